//  DRIVING.rs
//    by Lut99
//
//  Created:
//    07 Feb 2023, 13:55:29
//  Last edited:
//    19 Jun 2023, 14:12:50
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the interfaces of the master side: the wire messages slaves
//!   send to the master and the job surface the user program's
//!   run-method drives.
//

use std::fmt::{Display, Formatter, Result as FResult};
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::data::{DatasetId, JobId, SubmitOpts};
use crate::errors::{IdError, JobError, SubmitError};
use crate::tasks::{BucketAddr, TaskCoord};


/***** LIBRARY *****/
/// Identifies a registered slave. Stable for the lifetime of the slave's process.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct SlaveId(pub u64);

impl Display for SlaveId {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        write!(f, "slave {}", self.0)
    }
}

impl FromStr for SlaveId {
    type Err = IdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match u64::from_str(value) {
            Ok(id)   => Ok(Self(id)),
            Err(err) => Err(IdError::ParseError{ what: "SlaveId", raw: value.into(), err }),
        }
    }
}



/// The message with which a slave announces itself to the master (`POST /register`).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RegisterRequest {
    /// The `host:port` on which this slave serves its buckets and its RPC endpoint.
    pub endpoint : String,
    /// How many tasks this slave is willing to run concurrently.
    pub capacity : u32,
}

/// The master's answer to a registration.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RegisterReply {
    /// The identifier the slave uses in all further messages.
    pub slave : SlaveId,
    /// The job this master runs; the slave scopes its scratch directories with it.
    pub job   : JobId,
}



/// One output bucket of a completed task, as reported by the slave.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TaskOutput {
    /// The consumer split this bucket is destined for.
    pub split : u32,
    /// The URL under which the slave serves the bucket.
    pub url   : String,
}

/// The message with which a slave reports a completed task attempt (`POST /report/done`).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReportDoneRequest {
    /// The reporting slave.
    pub slave   : SlaveId,
    /// The task that completed.
    pub coord   : TaskCoord,
    /// The attempt that completed. The master discards reports for superseded attempts.
    pub attempt : u32,
    /// The sealed output buckets, one per consumer split.
    pub outputs : Vec<TaskOutput>,
    /// Input buckets this slave kept a local copy of while executing. The master records these as
    /// replicas for locality and failure recovery.
    pub cached  : Vec<BucketAddr>,
}

/// The master's verdict on a completion report.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ReportDoneReply {
    /// The completion is recorded; keep the buckets until told otherwise.
    Ack,
    /// The completion is superseded or duplicate; drop the buckets.
    Discard,
}



/// The message with which a slave reports a failed task attempt (`POST /report/failed`).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReportFailedRequest {
    /// The reporting slave.
    pub slave       : SlaveId,
    /// The task that failed.
    pub coord       : TaskCoord,
    /// The attempt that failed.
    pub attempt     : u32,
    /// A human-readable reason, surfaced in the abort message if the retry bound is exhausted.
    pub reason      : String,
    /// If the failure was a missing input bucket (404/410 or an unreachable peer), its address.
    /// The master invalidates the producer's completion and re-runs both sides; such failures do
    /// not count against the consumer's retry bound.
    pub stale_input : Option<BucketAddr>,
}



/// The periodic liveness message (`POST /heartbeat`).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HeartbeatRequest {
    /// The slave that is alive.
    pub slave   : SlaveId,
    /// The tasks the slave believes it is currently running.
    pub running : Vec<TaskCoord>,
}

/// The master's answer to a heartbeat.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HeartbeatReply {
    /// Tasks the slave is running but the master has reassigned elsewhere; the slave should cancel
    /// them and discard their outputs.
    pub reassign : Vec<TaskCoord>,
}



/// A lazily-fetched stream of records, as returned by [`JobScope::data()`].
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<(Vec<u8>, Vec<u8>), JobError>> + Send>>;

/// The job surface exposed to the user program's run-method.
///
/// All submissions are non-blocking; only `wait()`, `fetchall()` and `data()` suspend. The methods
/// mirror the options the original surface recognizes (`splits`, `outdir`, `parter`, `combiner`,
/// `key_serializer`, `value_serializer`) through [`SubmitOpts`].
#[async_trait]
pub trait JobScope: Send + Sync {
    /// Registers a source dataset of URL-addressable files, one task (and split) per URL.
    async fn file_data(&self, urls: Vec<String>, opts: SubmitOpts) -> Result<DatasetId, SubmitError>;

    /// Registers a source dataset backed by the given in-memory pairs, partitioned on the master.
    async fn local_data(&self, pairs: Vec<(Vec<u8>, Vec<u8>)>, opts: SubmitOpts) -> Result<DatasetId, SubmitError>;

    /// Registers a map dataset over the given input, running the named mapper.
    async fn map_data(&self, input: DatasetId, mapper: &str, opts: SubmitOpts) -> Result<DatasetId, SubmitError>;

    /// Registers a reduce dataset over the given input, running the named reducer.
    async fn reduce_data(&self, input: DatasetId, reducer: &str, opts: SubmitOpts) -> Result<DatasetId, SubmitError>;

    /// Registers a fused reduce-then-map dataset over the given input.
    async fn reducemap_data(&self, input: DatasetId, reducer: &str, mapper: &str, opts: SubmitOpts) -> Result<DatasetId, SubmitError>;

    /// Blocks until at least one of the given datasets is complete or the timeout elapses.
    ///
    /// # Returns
    /// The subset of `ids` that is complete, in submission order. With `timeout = Some(0)`, answers
    /// immediately with whatever subset is already complete.
    ///
    /// # Errors
    /// Returns [`JobError::Aborted`] when the job has fatally failed.
    async fn wait(&self, ids: &[DatasetId], timeout: Option<Duration>) -> Result<Vec<DatasetId>, JobError>;

    /// Returns the fraction of the given dataset's tasks that are complete, in `[0, 1]`.
    async fn progress(&self, id: DatasetId) -> Result<f64, JobError>;

    /// Marks the dataset closed. Closing an already-closed dataset is a no-op.
    async fn close(&self, id: DatasetId) -> Result<(), JobError>;

    /// Fetches the complete contents of a terminal dataset as `(key, value)` pairs, concatenated in
    /// split order.
    async fn fetchall(&self, id: DatasetId) -> Result<Vec<(Vec<u8>, Vec<u8>)>, JobError>;

    /// Returns the dataset contents as a lazy stream, split by split.
    async fn data(&self, id: DatasetId) -> Result<RecordStream, JobError>;
}
