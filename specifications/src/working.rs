//  WORKING.rs
//    by Lut99
//
//  Created:
//    07 Feb 2023, 14:31:06
//  Last edited:
//    30 May 2023, 11:20:14
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the interface of the slave side: the wire messages the
//!   master sends to a slave to assign and manage work.
//

use serde::{Deserialize, Serialize};

use crate::tasks::{TaskCoord, TaskDescriptor};


/***** LIBRARY *****/
/// The message with which the master offers a task to a slave (`POST /assign`).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AssignRequest {
    /// The task to execute.
    pub task : TaskDescriptor,
}

/// The slave's answer to an assignment offer.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AssignReply {
    /// The slave has taken the task and will report done or failed for it.
    Accepted,
    /// The slave is at capacity; the master should try the next candidate.
    Busy,
}



/// The message with which the master cancels a running task (`POST /cancel`).
///
/// Cancellation is best-effort: the task may run on until its next suspension point, but its
/// outputs are discarded.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CancelRequest {
    /// The task to cancel.
    pub coord : TaskCoord,
}



/// The message with which the master tells a slave to delete a task's buckets (`POST /drop`).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DropBucketRequest {
    /// The task whose buckets are no longer needed.
    pub coord : TaskCoord,
}



/// The slave's answer to a status query (`GET /ping`).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SlaveStatus {
    /// The tasks currently running on the slave.
    pub running       : Vec<TaskCoord>,
    /// The total size of the slave's on-disk working set, in bytes.
    pub scratch_bytes : u64,
}
