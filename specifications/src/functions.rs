//  FUNCTIONS.rs
//    by Lut99
//
//  Created:
//    07 Feb 2023, 15:02:44
//  Last edited:
//    19 Jun 2023, 14:30:22
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the interfaces between the framework and user code: the
//!   map/reduce/partition/serialize traits, the registry of named
//!   callables that every process constructs identically at startup and
//!   the user-program trait itself.
//

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;

use crate::data::{DatasetId, JobId};
use crate::driving::JobScope;
use crate::errors::SerializeError;


/***** CONSTANTS *****/
/// The name under which the default partitioner is implicitly registered.
pub const DEFAULT_PARTER: &str = "hash";
/// The name under which the identity serializer is implicitly registered.
pub const DEFAULT_SERIALIZER: &str = "raw";


/***** LIBRARY *****/
/// The coordinates identifying the currently-running task attempt, handed to every user function.
#[derive(Clone, Copy, Debug)]
pub struct TaskContext {
    /// The job this task runs under.
    pub job     : JobId,
    /// The dataset this task computes.
    pub dataset : DatasetId,
    /// The output split this task produces.
    pub split   : u32,
    /// The attempt number of this execution.
    pub attempt : u32,
}

impl TaskContext {
    /// Flattens this context plus a user-supplied path into seed material for the per-task
    /// deterministic generator.
    ///
    /// # Arguments
    /// - `path`: Extra integer coordinates with which the user carves up the task's random space
    ///   (e.g., a sample index). May be empty.
    ///
    /// # Returns
    /// The seed words, in a fixed order, so the same `(dataset, split, attempt, path)` always
    /// yields the same generator.
    pub fn seed_coords(&self, path: &[u64]) -> Vec<u64> {
        let mut coords: Vec<u64> = Vec::with_capacity(3 + path.len());
        coords.push(self.dataset.0);
        coords.push(self.split as u64);
        coords.push(self.attempt as u64);
        coords.extend_from_slice(path);
        coords
    }
}



/// The sink into which user functions emit their output pairs.
///
/// Emissions are consumed in emission order; a function may emit arbitrarily many pairs and may
/// hold internal state for the duration of one call.
pub trait Emit {
    /// Emits one `(key, value)` pair.
    fn emit(&mut self, key: Vec<u8>, value: Vec<u8>);
}

impl Emit for Vec<(Vec<u8>, Vec<u8>)> {
    #[inline]
    fn emit(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.push((key, value));
    }
}



/// A user map function: called once per input record.
pub trait Mapper: Send + Sync {
    /// Maps one input record to zero or more output pairs.
    fn map(&self, ctx: &TaskContext, key: &[u8], value: &[u8], emit: &mut dyn Emit);
}

/// A user reduce function: called once per key, with all values for that key delivered together.
///
/// Combiners are reducers run map-side over a partial value set.
pub trait Reducer: Send + Sync {
    /// Reduces all values of one key to zero or more output pairs.
    fn reduce(&self, ctx: &TaskContext, key: &[u8], values: &[Vec<u8>], emit: &mut dyn Emit);
}

/// A user partition function: maps a key and a split count to a split index.
pub trait Partitioner: Send + Sync {
    /// Returns the split index for the given key, in `[0, splits)`.
    fn partition(&self, key: &[u8], splits: u32) -> u32;
}

/// A user serializer: translates between record bytes and their on-bucket encoding.
///
/// Serialization of the values themselves is the user's business; the framework only threads the
/// named serializer through every bucket write and read.
pub trait Serializer: Send + Sync {
    /// Encodes a record payload for storage.
    fn encode(&self, value: &[u8]) -> Vec<u8>;
    /// Decodes a stored payload back into a record.
    fn decode(&self, raw: &[u8]) -> Result<Vec<u8>, SerializeError>;
}



/// The default partitioner: FNV-1a of the key, modulo the split count.
///
/// The constants are part of the wire contract: every process must map the same key to the same
/// split, across machines and across attempts.
#[derive(Clone, Copy, Debug)]
pub struct HashPartitioner;

impl HashPartitioner {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x00000100000001b3;

    /// Computes the stable FNV-1a hash of the given key.
    pub fn hash(key: &[u8]) -> u64 {
        let mut state: u64 = Self::FNV_OFFSET;
        for b in key {
            state ^= *b as u64;
            state = state.wrapping_mul(Self::FNV_PRIME);
        }
        state
    }
}

impl Partitioner for HashPartitioner {
    #[inline]
    fn partition(&self, key: &[u8], splits: u32) -> u32 {
        (Self::hash(key) % splits as u64) as u32
    }
}



/// The default serializer: the identity on byte strings.
#[derive(Clone, Copy, Debug)]
pub struct RawSerializer;

impl Serializer for RawSerializer {
    #[inline]
    fn encode(&self, value: &[u8]) -> Vec<u8> {
        value.to_vec()
    }

    #[inline]
    fn decode(&self, raw: &[u8]) -> Result<Vec<u8>, SerializeError> {
        Ok(raw.to_vec())
    }
}



/// The table of named callables a user program registers at startup.
///
/// Wire messages carry only names; every process resolves them against its own, identically
/// constructed registry. Unknown names are a fatal task error on the resolving slave.
pub struct FunctionRegistry {
    /// The registered map functions.
    mappers      : HashMap<String, Arc<dyn Mapper>>,
    /// The registered reduce functions (also used as combiners).
    reducers     : HashMap<String, Arc<dyn Reducer>>,
    /// The registered partitioners.
    partitioners : HashMap<String, Arc<dyn Partitioner>>,
    /// The registered serializers.
    serializers  : HashMap<String, Arc<dyn Serializer>>,
}

impl FunctionRegistry {
    /// Constructor for the FunctionRegistry that pre-registers the built-ins (the `"hash"`
    /// partitioner and the `"raw"` serializer).
    pub fn new() -> Self {
        let mut partitioners: HashMap<String, Arc<dyn Partitioner>> = HashMap::new();
        partitioners.insert(DEFAULT_PARTER.into(), Arc::new(HashPartitioner));
        let mut serializers: HashMap<String, Arc<dyn Serializer>> = HashMap::new();
        serializers.insert(DEFAULT_SERIALIZER.into(), Arc::new(RawSerializer));

        Self {
            mappers      : HashMap::new(),
            reducers     : HashMap::new(),
            partitioners,
            serializers,
        }
    }

    /// Registers a map function under the given name, replacing any previous registration.
    #[inline]
    pub fn register_mapper(&mut self, name: impl Into<String>, mapper: impl Mapper + 'static) -> &mut Self {
        self.mappers.insert(name.into(), Arc::new(mapper));
        self
    }

    /// Registers a reduce function under the given name, replacing any previous registration.
    #[inline]
    pub fn register_reducer(&mut self, name: impl Into<String>, reducer: impl Reducer + 'static) -> &mut Self {
        self.reducers.insert(name.into(), Arc::new(reducer));
        self
    }

    /// Registers a partitioner under the given name, replacing any previous registration.
    #[inline]
    pub fn register_partitioner(&mut self, name: impl Into<String>, parter: impl Partitioner + 'static) -> &mut Self {
        self.partitioners.insert(name.into(), Arc::new(parter));
        self
    }

    /// Registers a serializer under the given name, replacing any previous registration.
    #[inline]
    pub fn register_serializer(&mut self, name: impl Into<String>, serializer: impl Serializer + 'static) -> &mut Self {
        self.serializers.insert(name.into(), Arc::new(serializer));
        self
    }

    /// Resolves a map function by name.
    #[inline]
    pub fn mapper(&self, name: &str) -> Option<Arc<dyn Mapper>> {
        self.mappers.get(name).cloned()
    }

    /// Resolves a reduce function by name.
    #[inline]
    pub fn reducer(&self, name: &str) -> Option<Arc<dyn Reducer>> {
        self.reducers.get(name).cloned()
    }

    /// Resolves a partitioner by name.
    #[inline]
    pub fn partitioner(&self, name: &str) -> Option<Arc<dyn Partitioner>> {
        self.partitioners.get(name).cloned()
    }

    /// Resolves a serializer by name.
    #[inline]
    pub fn serializer(&self, name: &str) -> Option<Arc<dyn Serializer>> {
        self.serializers.get(name).cloned()
    }
}

impl Default for FunctionRegistry {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}



/// The trait a user program implements.
///
/// The program is constructed once per process, on master and slaves alike, with identical
/// constructor arguments; the framework then resolves all function names against its registry.
/// Only the master ever calls `run()`.
#[async_trait]
pub trait UserProgram: Send + Sync + 'static {
    /// Returns the program's table of named callables.
    fn registry(&self) -> &FunctionRegistry;

    /// The driver invokes this on the master with the job surface; dataset submissions, waits and
    /// fetches all go through `job`.
    ///
    /// # Errors
    /// Any error returned here is a user-program error: the driver reports it and exits nonzero.
    async fn run(&self, job: &dyn JobScope) -> Result<(), Box<dyn Error + Send + Sync>>;
}


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    /// The default partitioner must be stable across processes; pin its constants down.
    #[test]
    fn hashpartitioner_stable() {
        assert_eq!(HashPartitioner::hash(b""), 0xcbf29ce484222325);
        assert_eq!(HashPartitioner::hash(b"a"), 0xaf63dc4c8601ec8c);
        // Different keys spread over two splits (the wordcount scenario relies on this).
        assert_ne!(HashPartitioner.partition(b"a", 2), HashPartitioner.partition(b"b", 2));
    }

    #[test]
    fn registry_builtins() {
        let reg = FunctionRegistry::new();
        assert!(reg.partitioner(DEFAULT_PARTER).is_some());
        assert!(reg.serializer(DEFAULT_SERIALIZER).is_some());
        assert!(reg.mapper("nope").is_none());
    }

    #[test]
    fn seed_coords_order() {
        let ctx = TaskContext{ job: JobId::generate(), dataset: DatasetId(4), split: 2, attempt: 1 };
        assert_eq!(ctx.seed_coords(&[7, 8]), vec![4, 2, 1, 7, 8]);
    }
}
