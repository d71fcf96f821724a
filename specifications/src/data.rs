//  DATA.rs
//    by Lut99
//
//  Created:
//    06 Feb 2023, 10:24:18
//  Last edited:
//    14 Jun 2023, 09:31:56
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the project-wide dataset model: identifiers, dataset kinds
//!   and the specification a user submits to register a new node in the
//!   dataset graph.
//

use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::IdError;


/***** LIBRARY *****/
/// Defines a job identifier, which scopes every dataset, task and scratch directory of one run.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a new JobId.
    ///
    /// # Returns
    /// A new instance of a JobId that is practically unique.
    #[inline]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for JobId {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = IdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match Uuid::from_str(value) {
            Ok(uuid) => Ok(Self(uuid)),
            Err(err) => Err(IdError::UuidParseError{ what: "JobId", raw: value.into(), err }),
        }
    }
}



/// Defines a dataset identifier. These are monotonic within one job, handed out by the scheduler at submission.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct DatasetId(pub u64);

impl Display for DatasetId {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = IdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match u64::from_str(value) {
            Ok(id)   => Ok(Self(id)),
            Err(err) => Err(IdError::ParseError{ what: "DatasetId", raw: value.into(), err }),
        }
    }
}



/// Defines the possible kinds of datasets in the graph.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum DatasetKind {
    /// A source whose splits are URL-addressable files, one task per URL.
    Files,
    /// A source backed by an in-memory iterator, partitioned on the master.
    Local,
    /// A computed dataset running the named mapper over every input record.
    Map,
    /// A computed dataset grouping its input by key and running the named reducer.
    Reduce,
    /// A fused reduce-then-map, eliding a round of disk and network between the two phases.
    ReduceMap,
}

impl DatasetKind {
    /// Returns whether this kind is a source (i.e., has no parent datasets).
    #[inline]
    pub fn is_source(&self) -> bool {
        matches!(self, Self::Files | Self::Local)
    }
}

impl Display for DatasetKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use DatasetKind::*;
        match self {
            Files     => write!(f, "files"),
            Local     => write!(f, "local"),
            Map       => write!(f, "map"),
            Reduce    => write!(f, "reduce"),
            ReduceMap => write!(f, "reducemap"),
        }
    }
}



/// Defines the options a user may attach to a dataset submission.
///
/// Mirrors the keyword options of the job surface; anything left `None` takes the documented default.
#[derive(Clone, Debug, Default)]
pub struct SubmitOpts {
    /// The number of output splits (default 1).
    pub splits           : Option<u32>,
    /// A directory where the outputs are persisted instead of per-slave scratch space.
    pub outdir           : Option<PathBuf>,
    /// The name of the partitioner function (default `"hash"`).
    pub parter           : Option<String>,
    /// The name of a combiner to run map-side, if any.
    pub combiner         : Option<String>,
    /// The name of the key serializer (default `"raw"`).
    pub key_serializer   : Option<String>,
    /// The name of the value serializer (default `"raw"`).
    pub value_serializer : Option<String>,
}

impl SubmitOpts {
    /// Convenience constructor for the common case of only overriding the split count.
    #[inline]
    pub fn splits(splits: u32) -> Self {
        Self{ splits: Some(splits), ..Self::default() }
    }
}



/// Defines the full specification of a dataset as it is submitted to the scheduler.
///
/// Datasets are immutable once submitted; the scheduler only ever adds bookkeeping around them.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DatasetSpec {
    /// The kind of this dataset.
    pub kind             : DatasetKind,
    /// The ordered parent datasets (empty for sources).
    pub sources          : Vec<DatasetId>,
    /// For `Files` sources, the input URLs (one task each).
    pub urls             : Vec<String>,
    /// The number of output partitions. Always positive; for `Files` sources it equals the URL count.
    pub num_splits       : u32,
    /// Where to persist outputs, if anywhere beyond slave scratch space.
    pub outdir           : Option<PathBuf>,
    /// The name of the partitioner function applied on every inter-task edge.
    pub parter           : String,
    /// The name of the mapper (for `Map` and `ReduceMap` datasets).
    pub mapper           : Option<String>,
    /// The name of the reducer (for `Reduce` and `ReduceMap` datasets).
    pub reducer          : Option<String>,
    /// The name of the map-side combiner, if any.
    pub combiner         : Option<String>,
    /// The name of the key serializer.
    pub key_serializer   : String,
    /// The name of the value serializer.
    pub value_serializer : String,
}
