//  EXECUTOR.rs
//    by Lut99
//
//  Created:
//    04 Apr 2023, 09:17:22
//  Last edited:
//    21 Jun 2023, 13:05:46
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the execution of one task attempt on a slave: resolving
//!   the named user functions, assembling the input records, running the
//!   map / reduce / fused reduce-map computation, partitioning the
//!   emissions and writing the sealed output buckets.
//

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use reqwest::Client;

use harrow_reg::client;
use harrow_reg::errors::FetchError;
use harrow_reg::frame;
use harrow_reg::store::{BucketStore, BucketWriter};
use specifications::data::DatasetKind;
use specifications::driving::TaskOutput;
use specifications::functions::{Emit, FunctionRegistry, Partitioner, Reducer, Serializer, TaskContext, UserProgram};
use specifications::tasks::{BucketAddr, TaskDescriptor, TaskInput};

use crate::errors::ExecuteError;


/***** HELPER FUNCTIONS *****/
/// Groups records by key, preserving per-key value order, with the keys sorted so a re-run yields
/// the same reduce order.
fn group_by_key(records: Vec<(Vec<u8>, Vec<u8>)>) -> Vec<(Vec<u8>, Vec<Vec<u8>>)> {
    let mut groups: HashMap<Vec<u8>, Vec<Vec<u8>>> = HashMap::new();
    for (key, value) in records {
        groups.entry(key).or_default().push(value);
    }
    let mut grouped: Vec<(Vec<u8>, Vec<Vec<u8>>)> = groups.into_iter().collect();
    grouped.sort_by(|lhs, rhs| lhs.0.cmp(&rhs.0));
    grouped
}


/***** AUXILLARY *****/
/// An [`Emit`] sink that partitions every emission for the downstream consumer.
struct PartitionedEmit {
    /// The partitioner to route keys with.
    parter  : Arc<dyn Partitioner>,
    /// One buffer per output split, in emission order.
    buckets : Vec<Vec<(Vec<u8>, Vec<u8>)>>,
}

impl PartitionedEmit {
    /// Constructor for a PartitionedEmit with the given fan-out.
    fn new(parter: Arc<dyn Partitioner>, out_splits: u32) -> Self {
        Self {
            parter,
            buckets : (0..out_splits).map(|_| vec![]).collect(),
        }
    }

    /// Runs a combiner over every partition buffer, replacing each buffer with the combiner's
    /// emissions. Combiners must keep keys stable for the partitioning to remain correct.
    fn combine(&mut self, ctx: &TaskContext, combiner: &dyn Reducer) {
        for bucket in self.buckets.iter_mut() {
            let full: Vec<(Vec<u8>, Vec<u8>)> = std::mem::take(bucket);
            let mut shrunk: Vec<(Vec<u8>, Vec<u8>)> = vec![];
            for (key, values) in group_by_key(full) {
                combiner.reduce(ctx, &key, &values, &mut shrunk);
            }
            *bucket = shrunk;
        }
    }
}

impl Emit for PartitionedEmit {
    fn emit(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let split: u32 = self.parter.partition(&key, self.buckets.len() as u32);
        self.buckets[split as usize].push((key, value));
    }
}



/// What a successful attempt hands back for the completion report.
#[derive(Clone, Debug)]
pub struct TaskSuccess {
    /// The sealed output buckets, one per consumer split.
    pub outputs : Vec<TaskOutput>,
    /// The input buckets this slave kept a local copy of.
    pub cached  : Vec<BucketAddr>,
}


/***** LIBRARY *****/
/// Executes task attempts against the process-wide user program and the local bucket store.
pub struct TaskRunner {
    /// The user program whose registry we resolve names against.
    program  : Arc<dyn UserProgram>,
    /// The local bucket store we write into (and read local inputs from).
    store    : Arc<BucketStore>,
    /// The endpoint under which our buckets are advertised.
    endpoint : String,
    /// The shared HTTP client for peer fetches.
    client   : Client,
}

impl TaskRunner {
    /// Constructor for a TaskRunner.
    ///
    /// # Arguments
    /// - `program`: The user program, constructed at process startup.
    /// - `store`: The local [`BucketStore`].
    /// - `endpoint`: The `host:port` under which this slave serves its buckets.
    pub fn new(program: Arc<dyn UserProgram>, store: Arc<BucketStore>, endpoint: impl Into<String>) -> Self {
        Self {
            program,
            store,
            endpoint : endpoint.into(),
            client   : Client::new(),
        }
    }

    /// Executes one task attempt to completion.
    ///
    /// # Returns
    /// The sealed outputs and the list of inputs cached locally along the way.
    ///
    /// # Errors
    /// An [`ExecuteError`]; [`ExecuteError::StaleInput`] means the producer must re-run and does
    /// not count against this task's retries.
    pub async fn execute(&self, task: &TaskDescriptor) -> Result<TaskSuccess, ExecuteError> {
        debug!("Executing {} (attempt {}, {} inputs, {} output splits)", task.coord, task.attempt, task.inputs.len(), task.out_splits);
        let registry: &FunctionRegistry = self.program.registry();

        // Resolve everything up front so unknown names fail before any I/O
        let parter: Arc<dyn Partitioner> = match registry.partitioner(&task.parter) {
            Some(parter) => parter,
            None         => { return Err(ExecuteError::UnknownFunction{ what: "partitioner", name: task.parter.clone() }); },
        };
        let key_serializer: Arc<dyn Serializer> = match registry.serializer(&task.key_serializer) {
            Some(serializer) => serializer,
            None             => { return Err(ExecuteError::UnknownFunction{ what: "serializer", name: task.key_serializer.clone() }); },
        };
        let value_serializer: Arc<dyn Serializer> = match registry.serializer(&task.value_serializer) {
            Some(serializer) => serializer,
            None             => { return Err(ExecuteError::UnknownFunction{ what: "serializer", name: task.value_serializer.clone() }); },
        };

        let ctx: TaskContext = TaskContext {
            job     : task.job,
            dataset : task.coord.dataset,
            split   : task.coord.split,
            attempt : task.attempt,
        };

        // Pull the inputs in
        let (records, cached): (Vec<(Vec<u8>, Vec<u8>)>, Vec<BucketAddr>) = self.gather_inputs(task, registry).await?;

        // Run the user computation, partitioning as we go
        let mut emit: PartitionedEmit = PartitionedEmit::new(parter, task.out_splits);
        match task.kind {
            DatasetKind::Map => {
                let mapper = match task.mapper.as_ref().and_then(|name| registry.mapper(name)) {
                    Some(mapper) => mapper,
                    None         => { return Err(ExecuteError::UnknownFunction{ what: "mapper", name: task.mapper.clone().unwrap_or_default() }); },
                };
                for (key, value) in &records {
                    mapper.map(&ctx, key, value, &mut emit);
                }
                if let Some(name) = &task.combiner {
                    let combiner = match registry.reducer(name) {
                        Some(combiner) => combiner,
                        None           => { return Err(ExecuteError::UnknownFunction{ what: "combiner", name: name.clone() }); },
                    };
                    emit.combine(&ctx, combiner.as_ref());
                }
            },

            DatasetKind::Reduce => {
                let reducer = match task.reducer.as_ref().and_then(|name| registry.reducer(name)) {
                    Some(reducer) => reducer,
                    None          => { return Err(ExecuteError::UnknownFunction{ what: "reducer", name: task.reducer.clone().unwrap_or_default() }); },
                };
                for (key, values) in group_by_key(records) {
                    reducer.reduce(&ctx, &key, &values, &mut emit);
                }
            },

            DatasetKind::ReduceMap => {
                // The fused form: reduce, then feed every reduced pair straight into the mapper,
                // skipping the bucket round-trip a separate map dataset would cost
                let reducer = match task.reducer.as_ref().and_then(|name| registry.reducer(name)) {
                    Some(reducer) => reducer,
                    None          => { return Err(ExecuteError::UnknownFunction{ what: "reducer", name: task.reducer.clone().unwrap_or_default() }); },
                };
                let mapper = match task.mapper.as_ref().and_then(|name| registry.mapper(name)) {
                    Some(mapper) => mapper,
                    None         => { return Err(ExecuteError::UnknownFunction{ what: "mapper", name: task.mapper.clone().unwrap_or_default() }); },
                };
                for (key, values) in group_by_key(records) {
                    let mut reduced: Vec<(Vec<u8>, Vec<u8>)> = vec![];
                    reducer.reduce(&ctx, &key, &values, &mut reduced);
                    for (key, value) in reduced {
                        mapper.map(&ctx, &key, &value, &mut emit);
                    }
                }
            },

            kind => { return Err(ExecuteError::NotComputable{ kind }); },
        }

        // Write and seal the buckets
        for (split, bucket) in emit.buckets.into_iter().enumerate() {
            let mut writer: BucketWriter = match self.store.create(task.coord, task.attempt, split as u32) {
                Ok(writer) => writer,
                Err(err)   => { return Err(ExecuteError::StoreError{ err }); },
            };
            for (key, value) in bucket {
                if let Err(err) = writer.write(&key_serializer.encode(&key), &value_serializer.encode(&value)) {
                    return Err(ExecuteError::StoreError{ err });
                }
            }
            if let Err(err) = writer.finish() { return Err(ExecuteError::StoreError{ err }); }
        }
        if let Err(err) = self.store.seal(task.coord, task.attempt) { return Err(ExecuteError::StoreError{ err }); }

        // Persist to the output directory, if the dataset has one
        if let Some(outdir) = &task.outdir {
            for split in 0..task.out_splits {
                let addr: BucketAddr = BucketAddr::new(task.coord.dataset, task.coord.split, split);
                if let Err(err) = self.store.persist(&addr, outdir) { return Err(ExecuteError::StoreError{ err }); }
            }
        }

        let outputs: Vec<TaskOutput> = (0..task.out_splits)
            .map(|split| TaskOutput {
                split,
                url : BucketAddr::new(task.coord.dataset, task.coord.split, split).url_on(&self.endpoint),
            })
            .collect();
        Ok(TaskSuccess{ outputs, cached })
    }

    /// Assembles the input records of a task, in input order.
    ///
    /// Bucket inputs are taken from the local store when present; otherwise they are fetched from
    /// the peer and cached locally (write-through), which makes this slave a replica.
    async fn gather_inputs(&self, task: &TaskDescriptor, registry: &FunctionRegistry) -> Result<(Vec<(Vec<u8>, Vec<u8>)>, Vec<BucketAddr>), ExecuteError> {
        let mut records: Vec<(Vec<u8>, Vec<u8>)> = vec![];
        let mut cached: Vec<BucketAddr> = vec![];

        for input in &task.inputs {
            match input {
                TaskInput::Url(url) => {
                    let raw: Vec<u8> = match client::fetch_raw(&self.client, url).await {
                        Ok(raw)  => raw,
                        Err(err) => { return Err(ExecuteError::FetchError{ err }); },
                    };
                    records.extend(client::text_records(&raw));
                },

                TaskInput::Bucket{ addr, url, key_serializer, value_serializer } => {
                    let key_serializer: Arc<dyn Serializer> = match registry.serializer(key_serializer) {
                        Some(serializer) => serializer,
                        None             => { return Err(ExecuteError::UnknownFunction{ what: "serializer", name: key_serializer.clone() }); },
                    };
                    let value_serializer: Arc<dyn Serializer> = match registry.serializer(value_serializer) {
                        Some(serializer) => serializer,
                        None             => { return Err(ExecuteError::UnknownFunction{ what: "serializer", name: value_serializer.clone() }); },
                    };

                    // Local copy first, peer fetch second
                    let raw: Vec<u8> = match self.store.read(addr) {
                        Ok(raw) => raw,
                        Err(_)  => {
                            let raw: Vec<u8> = match client::fetch_raw(&self.client, url).await {
                                Ok(raw) => raw,
                                Err(err) if err.is_stale_input() => { return Err(ExecuteError::StaleInput{ addr: *addr }); },
                                Err(err) => { return Err(ExecuteError::FetchError{ err }); },
                            };
                            // Cache it; failing to do so costs replication, not correctness
                            match self.store.store_fetched(addr, &raw) {
                                Ok(_)    => { cached.push(*addr); },
                                Err(err) => { warn!("Failed to cache fetched {}: {}", addr, err); },
                            }
                            raw
                        },
                    };

                    let framed: Vec<(Vec<u8>, Vec<u8>)> = match frame::decode_records(&raw) {
                        Ok(framed) => framed,
                        Err(err)   => { return Err(ExecuteError::FetchError{ err: FetchError::FrameError{ url: url.clone(), err } }); },
                    };
                    for (key, value) in framed {
                        let key: Vec<u8> = match key_serializer.decode(&key) {
                            Ok(key)  => key,
                            Err(err) => { return Err(ExecuteError::SerializeError{ err }); },
                        };
                        let value: Vec<u8> = match value_serializer.decode(&value) {
                            Ok(value) => value,
                            Err(err)  => { return Err(ExecuteError::SerializeError{ err }); },
                        };
                        records.push((key, value));
                    }
                },
            }
        }
        Ok((records, cached))
    }
}


/***** TESTS *****/
