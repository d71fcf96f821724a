//  SPEC.rs
//    by Lut99
//
//  Created:
//    03 Apr 2023, 10:40:33
//  Last edited:
//    21 Jun 2023, 13:20:18
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines (public) interfaces and structs for the `harrow-job` crate.
//

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::AbortHandle;

use harrow_reg::store::BucketStore;
use specifications::driving::SlaveId;
use specifications::tasks::TaskCoord;

use crate::callback::MasterClient;
use crate::executor::TaskRunner;


/***** LIBRARY *****/
/// Defines the options with which a slave process is started.
#[derive(Clone, Debug)]
pub struct WorkerOptions {
    /// The master's address (`host:port`, or a full `http://` URL).
    pub master    : String,
    /// The hostname under which peers can reach this slave.
    pub host      : String,
    /// The port to serve on; 0 picks an ephemeral one.
    pub port      : u16,
    /// The scratch root for this slave's bucket store.
    pub tmpdir    : PathBuf,
    /// How many tasks to run concurrently.
    pub capacity  : u32,
    /// The heartbeat interval agreed with the master.
    pub heartbeat : Duration,
}



/// One running task attempt, as tracked by the slave's server.
#[derive(Debug)]
pub struct RunningTask {
    /// The attempt being executed.
    pub attempt : u32,
    /// The handle with which a cancel aborts the execution.
    pub abort   : AbortHandle,
}

/// The state shared by the slave's HTTP handlers, executor and heartbeat loop.
pub struct WorkerState {
    /// Our identifier with the master.
    pub slave    : SlaveId,
    /// How many tasks we accept concurrently.
    pub capacity : u32,
    /// The `host:port` under which we are advertised.
    pub endpoint : String,
    /// The executor for incoming assignments.
    pub runner   : Arc<TaskRunner>,
    /// The local bucket store (also served over HTTP).
    pub store    : Arc<BucketStore>,
    /// The callback client towards the master.
    pub master   : MasterClient,
    /// The currently-running task attempts.
    pub running  : DashMap<TaskCoord, RunningTask>,
    /// Raised when the master tells us to quit.
    pub quit     : Notify,
}
