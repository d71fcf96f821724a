//  SPEC.rs
//    by Lut99
//
//  Created:
//    06 Mar 2023, 09:10:17
//  Last edited:
//    19 Jun 2023, 16:20:02
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines (public) interfaces and structs for the `harrow-tsk` crate.
//

use async_trait::async_trait;

use specifications::tasks::{TaskCoord, TaskDescriptor};
use specifications::working::{AssignReply, SlaveStatus};

use crate::errors::TransportError;


/***** LIBRARY *****/
/// Abstracts how the scheduler reaches a slave.
///
/// The production implementation speaks JSON over HTTP with the RPC retry policy; tests drive the
/// scheduler with an in-process implementation instead. Implementations must only return an error
/// once they consider the slave unreachable; the scheduler then treats the slave as lost.
#[async_trait]
pub trait SlaveTransport: Send + Sync + 'static {
    /// Offers a task to the slave at the given endpoint.
    async fn assign(&self, endpoint: &str, task: TaskDescriptor) -> Result<AssignReply, TransportError>;

    /// Cancels a running task. Best-effort; the slave discards the task's outputs.
    async fn cancel(&self, endpoint: &str, coord: TaskCoord) -> Result<(), TransportError>;

    /// Queries a slave for its current status.
    async fn ping(&self, endpoint: &str) -> Result<SlaveStatus, TransportError>;

    /// Tells a slave to delete all buckets of the given task.
    async fn drop_bucket(&self, endpoint: &str, coord: TaskCoord) -> Result<(), TransportError>;

    /// Tells a slave to shut down.
    async fn quit(&self, endpoint: &str) -> Result<(), TransportError>;
}
