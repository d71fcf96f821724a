//  ERRORS.rs
//    by Lut99
//
//  Created:
//    06 Feb 2023, 10:11:34
//  Last edited:
//    30 May 2023, 11:02:45
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the errors that are shared across crate boundaries: anything
//!   the scheduler reports back over the job surface, plus parsing errors
//!   for the project-wide identifiers.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};

use crate::data::DatasetId;


/***** LIBRARY *****/
/// Defines errors that may occur when parsing identifiers from strings.
#[derive(Debug)]
pub enum IdError {
    /// Failed to parse the identifier as the given type.
    ParseError{ what: &'static str, raw: String, err: std::num::ParseIntError },
    /// Failed to parse a UUID-based identifier.
    UuidParseError{ what: &'static str, raw: String, err: uuid::Error },
}

impl Display for IdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use IdError::*;
        match self {
            ParseError{ what, raw, err }     => write!(f, "Failed to parse '{}' as a {}: {}", raw, what, err),
            UuidParseError{ what, raw, err } => write!(f, "Failed to parse '{}' as a {}: {}", raw, what, err),
        }
    }
}

impl Error for IdError {}



/// Defines the errors a dataset submission may be refused with.
///
/// These are surfaced synchronously to the submitter; a refused submission never affects the rest of the job.
#[derive(Clone, Debug)]
pub enum SubmitError {
    /// One of the referenced parents does not exist.
    UnknownParent{ id: DatasetId },
    /// One of the referenced parents has already been closed.
    ClosedParent{ id: DatasetId },
    /// The given number of splits is zero.
    ZeroSplits,
    /// The dataset consumes a source dataset but has a different number of splits.
    SourceSplitMismatch{ parent: DatasetId, parent_splits: u32, splits: u32 },
    /// The dataset disagrees with the output partition count its parent's tasks already write.
    OutSplitsConflict{ parent: DatasetId, fixed: u32, splits: u32 },
    /// The kind of the submitted dataset requires a function that was not given.
    MissingFunction{ kind: &'static str, what: &'static str },
    /// A function named in the submission is not in the user program's registry.
    UnknownFunction{ what: &'static str, name: String },
    /// The master failed to write the partitions of a local source.
    LocalWriteError{ reason: String },
    /// The scheduler is no longer accepting submissions.
    SchedulerDown,
}

impl Display for SubmitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use SubmitError::*;
        match self {
            UnknownParent{ id } => write!(f, "Unknown parent dataset '{}'", id),
            ClosedParent{ id }  => write!(f, "Parent dataset '{}' is already closed", id),
            ZeroSplits          => write!(f, "A dataset must have at least one split"),

            SourceSplitMismatch{ parent, parent_splits, splits } => write!(f, "Source dataset '{}' has {} splits, but its consumer declares {}; consumers of sources must be split-aligned", parent, parent_splits, splits),
            OutSplitsConflict{ parent, fixed, splits }           => write!(f, "Tasks of dataset '{}' already partition their output into {} buckets, which conflicts with a new consumer of {} splits", parent, fixed, splits),
            MissingFunction{ kind, what }                        => write!(f, "A {} dataset requires a {} function", kind, what),
            UnknownFunction{ what, name }                        => write!(f, "Unknown {} '{}' (is it registered on every process?)", what, name),
            LocalWriteError{ reason }                            => write!(f, "Failed to write local source partitions: {}", reason),

            SchedulerDown => write!(f, "The scheduler has shut down and accepts no further submissions"),
        }
    }
}

impl Error for SubmitError {}



/// Defines the errors the blocking job-surface calls may return.
#[derive(Clone, Debug)]
pub enum JobError {
    /// The job has aborted; carries the human-readable reason derived from the last failure.
    Aborted{ reason: String },
    /// The given dataset is not known to the scheduler.
    UnknownDataset{ id: DatasetId },
    /// The given dataset is not complete yet (e.g., its outputs were requested early).
    NotComplete{ id: DatasetId },
    /// Fetching a terminal dataset's records failed.
    TransferError{ reason: String },
    /// A serializer named in a fetched dataset is not in this process's registry.
    UnknownFunction{ what: &'static str, name: String },
    /// The scheduler has gone away.
    SchedulerDown,
}

impl Display for JobError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use JobError::*;
        match self {
            Aborted{ reason }       => write!(f, "Job aborted: {}", reason),
            UnknownDataset{ id }    => write!(f, "Unknown dataset '{}'", id),
            NotComplete{ id }       => write!(f, "Dataset '{}' is not complete", id),
            TransferError{ reason } => write!(f, "Failed to fetch dataset records: {}", reason),
            UnknownFunction{ what, name } => write!(f, "Unknown {} '{}' (is it registered on every process?)", what, name),
            SchedulerDown           => write!(f, "The scheduler has shut down"),
        }
    }
}

impl Error for JobError {}



/// Defines errors that may occur when de(serializing) a record through a user serializer.
#[derive(Debug)]
pub enum SerializeError {
    /// The raw bytes did not decode as a value of the serializer's type.
    DecodeError{ serializer: String, reason: String },
}

impl Display for SerializeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use SerializeError::*;
        match self {
            DecodeError{ serializer, reason } => write!(f, "Serializer '{}' failed to decode record: {}", serializer, reason),
        }
    }
}

impl Error for SerializeError {}
