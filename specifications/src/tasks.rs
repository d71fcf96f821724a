//  TASKS.rs
//    by Lut99
//
//  Created:
//    06 Feb 2023, 11:40:02
//  Last edited:
//    14 Jun 2023, 09:40:31
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the task model shared between master and slaves: task
//!   coordinates, bucket addresses and the descriptor that travels in an
//!   assignment message.
//

use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::data::{DatasetId, DatasetKind, JobId};


/***** LIBRARY *****/
/// Identifies one task: the computation producing one split of one dataset.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct TaskCoord {
    /// The dataset this task belongs to.
    pub dataset : DatasetId,
    /// The output split this task produces.
    pub split   : u32,
}

impl TaskCoord {
    /// Constructor for a TaskCoord.
    #[inline]
    pub fn new(dataset: DatasetId, split: u32) -> Self {
        Self{ dataset, split }
    }
}

impl Display for TaskCoord {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        write!(f, "task {}:{}", self.dataset, self.split)
    }
}



/// Addresses one bucket: the output of task `source` of dataset `dataset`, destined for consumer split `split`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct BucketAddr {
    /// The dataset whose task produced this bucket.
    pub dataset : DatasetId,
    /// The producing task's split index within its dataset.
    pub source  : u32,
    /// The consumer split this bucket is destined for.
    pub split   : u32,
}

impl BucketAddr {
    /// Constructor for a BucketAddr.
    #[inline]
    pub fn new(dataset: DatasetId, source: u32, split: u32) -> Self {
        Self{ dataset, source, split }
    }

    /// Returns the HTTP path under which this bucket is served (no leading slash).
    #[inline]
    pub fn url_path(&self) -> String {
        format!("bucket/{}/{}/{}", self.dataset, self.source, self.split)
    }

    /// Renders the full URL for this bucket on the given endpoint.
    ///
    /// # Arguments
    /// - `endpoint`: The `host:port` (or full `http://` prefix) of the serving slave.
    ///
    /// # Returns
    /// A URL that a consumer can GET to stream the bucket's records.
    pub fn url_on(&self, endpoint: impl AsRef<str>) -> String {
        let endpoint: &str = endpoint.as_ref();
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            format!("{}/{}", endpoint.trim_end_matches('/'), self.url_path())
        } else {
            format!("http://{}/{}", endpoint.trim_end_matches('/'), self.url_path())
        }
    }
}

impl Display for BucketAddr {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        write!(f, "bucket {}/{}/{}", self.dataset, self.source, self.split)
    }
}



/// Defines one input of a task.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum TaskInput {
    /// A raw, URL-addressable source file, decoded as text lines.
    Url(String),
    /// An intermediate bucket produced by an upstream task, fetchable at the given URL.
    Bucket {
        /// The address of the bucket.
        addr             : BucketAddr,
        /// The URL where the bucket may currently be fetched.
        url              : String,
        /// The serializer names its records were encoded with (the producer's, not ours).
        key_serializer   : String,
        value_serializer : String,
    },
}

/// Defines everything a slave needs to execute one task attempt.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TaskDescriptor {
    /// The job this task belongs to.
    pub job              : JobId,
    /// The coordinates of the task.
    pub coord            : TaskCoord,
    /// The attempt number of this execution. Increments on reassignment.
    pub attempt          : u32,
    /// The generation of the producing task; consumers key their fetch records by this so a re-run
    /// producer invalidates stale fetches.
    pub generation       : u64,
    /// The kind of the dataset this task computes.
    pub kind             : DatasetKind,
    /// The ordered inputs of this task.
    pub inputs           : Vec<TaskInput>,
    /// How many output buckets to write (the downstream consumer's split count).
    pub out_splits       : u32,
    /// Where to persist outputs, if anywhere beyond scratch space.
    pub outdir           : Option<PathBuf>,
    /// The name of the partitioner to partition outputs with.
    pub parter           : String,
    /// The name of the mapper, where applicable.
    pub mapper           : Option<String>,
    /// The name of the reducer, where applicable.
    pub reducer          : Option<String>,
    /// The name of the map-side combiner, if any.
    pub combiner         : Option<String>,
    /// The name of the key serializer.
    pub key_serializer   : String,
    /// The name of the value serializer.
    pub value_serializer : String,
}


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucketaddr_urls() {
        let addr = BucketAddr::new(DatasetId(3), 1, 4);
        assert_eq!(addr.url_path(), "bucket/3/1/4");
        assert_eq!(addr.url_on("127.0.0.1:8080"), "http://127.0.0.1:8080/bucket/3/1/4");
        assert_eq!(addr.url_on("http://127.0.0.1:8080/"), "http://127.0.0.1:8080/bucket/3/1/4");
    }
}
