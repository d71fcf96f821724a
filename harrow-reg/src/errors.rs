//  ERRORS.rs
//    by Lut99
//
//  Created:
//    20 Feb 2023, 09:16:02
//  Last edited:
//    19 Jun 2023, 15:04:33
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the errors that may occur in the `harrow-reg` crate.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;

use specifications::tasks::{BucketAddr, TaskCoord};


/***** LIBRARY *****/
/// Defines errors that relate to the record frame format.
#[derive(Debug)]
pub enum FrameError {
    /// The stream ended in the middle of a frame.
    TruncatedFrame{ offset: u64 },
    /// Failed to read from the underlying reader.
    ReadError{ offset: u64, err: std::io::Error },
}

impl Display for FrameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use FrameError::*;
        match self {
            TruncatedFrame{ offset }  => write!(f, "Record stream ends mid-frame at byte {}", offset),
            ReadError{ offset, err }  => write!(f, "Failed to read record stream at byte {}: {}", offset, err),
        }
    }
}

impl Error for FrameError {}



/// Defines errors that relate to the on-disk bucket store.
#[derive(Debug)]
pub enum StoreError {
    /// Failed to create a directory for a task attempt.
    DirCreateError{ path: PathBuf, err: std::io::Error },
    /// Failed to create a bucket file.
    FileCreateError{ path: PathBuf, err: std::io::Error },
    /// Failed to write to a bucket file.
    FileWriteError{ path: PathBuf, err: std::io::Error },
    /// Failed to seal a task attempt's buckets.
    SealError{ coord: TaskCoord, attempt: u32, err: std::io::Error },
    /// Failed to remove a directory.
    DirRemoveError{ path: PathBuf, err: std::io::Error },
    /// Failed to persist a sealed bucket to the dataset's output directory.
    PersistError{ addr: BucketAddr, path: PathBuf, err: std::io::Error },
    /// Failed to measure the store's working set.
    UsageError{ path: PathBuf, err: std::io::Error },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use StoreError::*;
        match self {
            DirCreateError{ path, err }       => write!(f, "Failed to create bucket directory '{}': {}", path.display(), err),
            FileCreateError{ path, err }      => write!(f, "Failed to create bucket file '{}': {}", path.display(), err),
            FileWriteError{ path, err }       => write!(f, "Failed to write bucket file '{}': {}", path.display(), err),
            SealError{ coord, attempt, err }  => write!(f, "Failed to seal buckets of {} (attempt {}): {}", coord, attempt, err),
            DirRemoveError{ path, err }       => write!(f, "Failed to remove bucket directory '{}': {}", path.display(), err),
            PersistError{ addr, path, err }   => write!(f, "Failed to persist {} to output directory '{}': {}", addr, path.display(), err),
            UsageError{ path, err }           => write!(f, "Failed to measure working set under '{}': {}", path.display(), err),
        }
    }
}

impl Error for StoreError {}



/// Defines the reasons a bucket read may come up empty.
#[derive(Debug)]
pub enum ReadError {
    /// The bucket was never (or not yet) sealed here.
    NotFound{ addr: BucketAddr },
    /// The bucket existed here but has been deleted on master command.
    Gone{ addr: BucketAddr },
    /// The bucket file exists but could not be read.
    IoError{ addr: BucketAddr, err: std::io::Error },
}

impl Display for ReadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use ReadError::*;
        match self {
            NotFound{ addr }    => write!(f, "Unknown {}", addr),
            Gone{ addr }        => write!(f, "{} has been deleted", addr),
            IoError{ addr, err } => write!(f, "Failed to read {}: {}", addr, err),
        }
    }
}

impl Error for ReadError {}



/// Defines errors that may occur when fetching a bucket (or source file) from a peer.
#[derive(Debug)]
pub enum FetchError {
    /// The peer does not know the bucket (HTTP 404); the producer must re-run.
    NotFound{ url: String },
    /// The peer has deleted the bucket (HTTP 410); the producer must re-run.
    Gone{ url: String },
    /// The request itself failed, even after retries.
    RequestError{ url: String, err: reqwest::Error },
    /// The peer answered with an unexpected status code.
    StatusError{ url: String, code: u16 },
    /// The body was not a valid record stream.
    FrameError{ url: String, err: FrameError },
    /// A schema-less URL was opened as a local file, which failed.
    FileError{ path: PathBuf, err: std::io::Error },
}

impl FetchError {
    /// Returns whether this error means the producing task must be re-run (stale input), as
    /// opposed to a transient transport problem.
    #[inline]
    pub fn is_stale_input(&self) -> bool {
        matches!(self, Self::NotFound{ .. } | Self::Gone{ .. })
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use FetchError::*;
        match self {
            NotFound{ url }          => write!(f, "Bucket at '{}' is unknown to its host", url),
            Gone{ url }              => write!(f, "Bucket at '{}' has been deleted by its host", url),
            RequestError{ url, err } => write!(f, "Failed to fetch '{}': {}", url, err),
            StatusError{ url, code } => write!(f, "Fetching '{}' returned unexpected status {}", url, code),
            FrameError{ url, err }   => write!(f, "Body of '{}' is not a valid record stream: {}", url, err),
            FileError{ path, err }   => write!(f, "Failed to read local input '{}': {}", path.display(), err),
        }
    }
}

impl Error for FetchError {}
