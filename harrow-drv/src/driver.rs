//  DRIVER.rs
//    by Lut99
//
//  Created:
//    18 Apr 2023, 09:22:35
//  Last edited:
//    22 Jun 2023, 13:50:24
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the job driver: it binds the user program to a fresh
//!   scheduler, exposes the job surface its run-method drives (dataset
//!   submission, wait/progress, fetching) and shuts everything down
//!   cleanly afterwards - on return, on error and on Ctrl-C.
//

use std::collections::VecDeque;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};
use reqwest::Client;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;

use harrow_cfg::node::TimingConfig;
use harrow_reg::client;
use harrow_reg::frame;
use harrow_reg::store::BucketStore;
use harrow_tsk::scheduler::{Scheduler, SchedulerHandle};
use specifications::data::{DatasetId, DatasetKind, DatasetSpec, JobId, SubmitOpts};
use specifications::driving::{JobScope, RecordStream};
use specifications::errors::{JobError, SubmitError};
use specifications::functions::{DEFAULT_PARTER, DEFAULT_SERIALIZER, Partitioner, Serializer, UserProgram};
use specifications::tasks::{BucketAddr, TaskInput};

use crate::errors::DriverError;
use crate::server::{self, MasterState};
use crate::transport::HttpSlaveTransport;


/***** HELPER FUNCTIONS *****/
/// Fetches and decodes the records of one task's outputs, in partition order.
///
/// Bucket inputs are read from the local (master) store when they live there, fetched from their
/// slave otherwise.
async fn fetch_records(client: &Client, program: &Arc<dyn UserProgram>, store: &Arc<BucketStore>, inputs: &[TaskInput]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, JobError> {
    let mut records: Vec<(Vec<u8>, Vec<u8>)> = vec![];
    for input in inputs {
        match input {
            TaskInput::Url(url) => {
                let raw: Vec<u8> = match client::fetch_raw(client, url).await {
                    Ok(raw)  => raw,
                    Err(err) => { return Err(JobError::TransferError{ reason: err.to_string() }); },
                };
                records.extend(client::text_records(&raw));
            },

            TaskInput::Bucket{ addr, url, key_serializer, value_serializer } => {
                let key_serializer: Arc<dyn Serializer> = match program.registry().serializer(key_serializer) {
                    Some(serializer) => serializer,
                    None             => { return Err(JobError::UnknownFunction{ what: "serializer", name: key_serializer.clone() }); },
                };
                let value_serializer: Arc<dyn Serializer> = match program.registry().serializer(value_serializer) {
                    Some(serializer) => serializer,
                    None             => { return Err(JobError::UnknownFunction{ what: "serializer", name: value_serializer.clone() }); },
                };

                let raw: Vec<u8> = match store.read(addr) {
                    Ok(raw) => raw,
                    Err(_)  => match client::fetch_raw(client, url).await {
                        Ok(raw)  => raw,
                        Err(err) => { return Err(JobError::TransferError{ reason: err.to_string() }); },
                    },
                };
                let framed: Vec<(Vec<u8>, Vec<u8>)> = match frame::decode_records(&raw) {
                    Ok(framed) => framed,
                    Err(err)   => { return Err(JobError::TransferError{ reason: err.to_string() }); },
                };
                for (key, value) in framed {
                    let key: Vec<u8> = key_serializer.decode(&key).map_err(|err| JobError::TransferError{ reason: err.to_string() })?;
                    let value: Vec<u8> = value_serializer.decode(&value).map_err(|err| JobError::TransferError{ reason: err.to_string() })?;
                    records.push((key, value));
                }
            },
        }
    }
    Ok(records)
}


/***** AUXILLARY *****/
/// Defines the options with which a master process is started.
#[derive(Clone, Debug)]
pub struct MasterOptions {
    /// The hostname under which slaves reach the master.
    pub host          : String,
    /// The port to serve on; 0 picks an ephemeral one.
    pub port          : u16,
    /// The scratch root for the master's local-partition store.
    pub tmpdir        : PathBuf,
    /// The timing and retry knobs.
    pub timing        : TimingConfig,
    /// If nonzero, wait for this many slave registrations before starting the run-method.
    pub timing_slaves : u32,
}


/***** LIBRARY *****/
/// The job surface handed to the user program's run-method.
///
/// Thin by design: every call forwards to the scheduler; the only master-side work is partitioning
/// local source data and fetching terminal results.
pub struct Job {
    /// The handle into the scheduler loop.
    scheduler    : SchedulerHandle,
    /// The user program (for resolving partitioners and serializers on the master).
    program      : Arc<dyn UserProgram>,
    /// The master's own bucket store.
    store        : Arc<BucketStore>,
    /// The endpoint under which the master serves its local partitions.
    endpoint     : String,
    /// The shared HTTP client for result fetching.
    client       : Client,
    /// The first abort reason observed through this surface, if any.
    abort_reason : Mutex<Option<String>>,
}

impl Job {
    /// Records abort errors passing through the surface, so the driver can exit accordingly even
    /// when the user program swallows them.
    fn note<T>(&self, result: Result<T, JobError>) -> Result<T, JobError> {
        if let Err(JobError::Aborted{ reason }) = &result {
            let mut slot = self.abort_reason.lock().unwrap();
            if slot.is_none() { *slot = Some(reason.clone()); }
        }
        result
    }

    /// Returns the abort reason observed through this surface, if any.
    pub fn abort_reason(&self) -> Option<String> {
        self.abort_reason.lock().unwrap().clone()
    }

    /// Builds a full [`DatasetSpec`] from the common submission pieces.
    fn spec(&self, kind: DatasetKind, sources: Vec<DatasetId>, urls: Vec<String>, mapper: Option<String>, reducer: Option<String>, opts: SubmitOpts) -> DatasetSpec {
        DatasetSpec {
            kind,
            sources,
            urls,
            num_splits       : opts.splits.unwrap_or(1),
            outdir           : opts.outdir,
            parter           : opts.parter.unwrap_or_else(|| DEFAULT_PARTER.into()),
            mapper,
            reducer,
            combiner         : opts.combiner,
            key_serializer   : opts.key_serializer.unwrap_or_else(|| DEFAULT_SERIALIZER.into()),
            value_serializer : opts.value_serializer.unwrap_or_else(|| DEFAULT_SERIALIZER.into()),
        }
    }

    /// Checks that a function name the submission relies on exists in the registry, master-side,
    /// so typos fail at submission instead of as a fatal task error later.
    fn check_function(&self, what: &'static str, name: &str) -> Result<(), SubmitError> {
        let known: bool = match what {
            "mapper"      => self.program.registry().mapper(name).is_some(),
            "reducer"     => self.program.registry().reducer(name).is_some(),
            "combiner"    => self.program.registry().reducer(name).is_some(),
            "partitioner" => self.program.registry().partitioner(name).is_some(),
            _             => self.program.registry().serializer(name).is_some(),
        };
        if known { Ok(()) } else { Err(SubmitError::UnknownFunction{ what, name: name.into() }) }
    }

    /// Validates the function names a spec relies on before submission.
    fn check_spec(&self, spec: &DatasetSpec) -> Result<(), SubmitError> {
        if let Some(mapper) = &spec.mapper { self.check_function("mapper", mapper)?; }
        if let Some(reducer) = &spec.reducer { self.check_function("reducer", reducer)?; }
        if let Some(combiner) = &spec.combiner { self.check_function("combiner", combiner)?; }
        self.check_function("partitioner", &spec.parter)?;
        self.check_function("serializer", &spec.key_serializer)?;
        self.check_function("serializer", &spec.value_serializer)?;
        Ok(())
    }
}

#[async_trait]
impl JobScope for Job {
    async fn file_data(&self, urls: Vec<String>, opts: SubmitOpts) -> Result<DatasetId, SubmitError> {
        // The split count of a file source is its URL count; the graph normalizes it
        let spec: DatasetSpec = self.spec(DatasetKind::Files, vec![], urls, None, None, opts);
        self.check_spec(&spec)?;
        self.scheduler.submit(spec).await
    }

    async fn local_data(&self, pairs: Vec<(Vec<u8>, Vec<u8>)>, opts: SubmitOpts) -> Result<DatasetId, SubmitError> {
        let spec: DatasetSpec = self.spec(DatasetKind::Local, vec![], vec![], None, None, opts);
        self.check_spec(&spec)?;
        let splits: u32 = spec.num_splits;

        // Resolve what we need for master-side partitioning
        let parter: Arc<dyn Partitioner> = self.program.registry().partitioner(&spec.parter).unwrap();
        let key_serializer: Arc<dyn Serializer> = self.program.registry().serializer(&spec.key_serializer).unwrap();
        let value_serializer: Arc<dyn Serializer> = self.program.registry().serializer(&spec.value_serializer).unwrap();

        let id: DatasetId = self.scheduler.submit(spec).await?;

        // Partition on the master; an empty source advertises no buckets (and thus zero tasks)
        let mut urls: Vec<String> = vec![];
        if !pairs.is_empty() {
            let mut buckets: Vec<Vec<(Vec<u8>, Vec<u8>)>> = (0..splits).map(|_| vec![]).collect();
            for (key, value) in pairs {
                let split: u32 = parter.partition(&key, splits);
                buckets[split as usize].push((key_serializer.encode(&key), value_serializer.encode(&value)));
            }
            for (split, bucket) in buckets.into_iter().enumerate() {
                let addr: BucketAddr = BucketAddr::new(id, split as u32, 0);
                if let Err(err) = self.store.store_fetched(&addr, &frame::encode_records(&bucket)) {
                    return Err(SubmitError::LocalWriteError{ reason: err.to_string() });
                }
                urls.push(addr.url_on(&self.endpoint));
            }
        }

        match self.scheduler.advertise_local(id, urls).await {
            Ok(_)  => Ok(id),
            Err(_) => Err(SubmitError::SchedulerDown),
        }
    }

    async fn map_data(&self, input: DatasetId, mapper: &str, opts: SubmitOpts) -> Result<DatasetId, SubmitError> {
        let spec: DatasetSpec = self.spec(DatasetKind::Map, vec![input], vec![], Some(mapper.into()), None, opts);
        self.check_spec(&spec)?;
        self.scheduler.submit(spec).await
    }

    async fn reduce_data(&self, input: DatasetId, reducer: &str, opts: SubmitOpts) -> Result<DatasetId, SubmitError> {
        let spec: DatasetSpec = self.spec(DatasetKind::Reduce, vec![input], vec![], None, Some(reducer.into()), opts);
        self.check_spec(&spec)?;
        self.scheduler.submit(spec).await
    }

    async fn reducemap_data(&self, input: DatasetId, reducer: &str, mapper: &str, opts: SubmitOpts) -> Result<DatasetId, SubmitError> {
        let spec: DatasetSpec = self.spec(DatasetKind::ReduceMap, vec![input], vec![], Some(mapper.into()), Some(reducer.into()), opts);
        self.check_spec(&spec)?;
        self.scheduler.submit(spec).await
    }

    async fn wait(&self, ids: &[DatasetId], timeout: Option<Duration>) -> Result<Vec<DatasetId>, JobError> {
        // While we block, stream coarse progress to stderr
        let mut wait = Box::pin(self.scheduler.wait(ids.to_vec(), timeout));
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                result = &mut wait => { return self.note(result); },
                _ = ticker.tick() => {
                    for id in ids {
                        if let Ok(progress) = self.scheduler.progress(*id).await {
                            eprintln!("dataset {}: {:5.1}% complete", id, 100.0 * progress);
                        }
                    }
                },
            }
        }
    }

    async fn progress(&self, id: DatasetId) -> Result<f64, JobError> {
        self.note(self.scheduler.progress(id).await)
    }

    async fn close(&self, id: DatasetId) -> Result<(), JobError> {
        self.note(self.scheduler.close(id).await)
    }

    async fn fetchall(&self, id: DatasetId) -> Result<Vec<(Vec<u8>, Vec<u8>)>, JobError> {
        // Block until the dataset is there, then gather split by split, in split order
        self.wait(&[id], None).await?;
        let outputs: Vec<Vec<TaskInput>> = self.note(self.scheduler.outputs(id).await)?;

        let mut records: Vec<(Vec<u8>, Vec<u8>)> = vec![];
        for task in outputs {
            records.extend(fetch_records(&self.client, &self.program, &self.store, &task).await?);
        }
        Ok(records)
    }

    async fn data(&self, id: DatasetId) -> Result<RecordStream, JobError> {
        self.wait(&[id], None).await?;
        let outputs: Vec<Vec<TaskInput>> = self.note(self.scheduler.outputs(id).await)?;

        // Fetch lazily: one task's outputs at a time, as the stream is polled
        struct State {
            tasks   : VecDeque<Vec<TaskInput>>,
            buffer  : VecDeque<(Vec<u8>, Vec<u8>)>,
            client  : Client,
            program : Arc<dyn UserProgram>,
            store   : Arc<BucketStore>,
        }
        let state: State = State {
            tasks   : outputs.into(),
            buffer  : VecDeque::new(),
            client  : self.client.clone(),
            program : self.program.clone(),
            store   : self.store.clone(),
        };

        let stream = futures_util::stream::try_unfold(state, |mut state| async move {
            loop {
                if let Some(record) = state.buffer.pop_front() {
                    return Ok(Some((record, state)));
                }
                match state.tasks.pop_front() {
                    Some(task) => {
                        state.buffer = fetch_records(&state.client, &state.program, &state.store, &task).await?.into();
                    },
                    None => { return Ok(None); },
                }
            }
        });
        Ok(Box::pin(stream))
    }
}



/// Runs a master process to completion: scheduler, callback server, then the user program's
/// run-method, then a clean shutdown.
///
/// # Arguments
/// - `program`: The process-wide user program instance.
/// - `opts`: The [`MasterOptions`] to run with.
///
/// # Errors
/// A [`DriverError`]; the launcher maps `UserError` to exit code 1 and `Fatal` to exit code 2.
pub async fn run_master(program: Arc<dyn UserProgram>, opts: MasterOptions) -> Result<(), DriverError> {
    let job: JobId = JobId::generate();
    info!("Starting job {}", job);

    // Bind first, so an ephemeral port is known before anything advertises it
    let raw: String = format!("{}:{}", opts.host, opts.port);
    let bind: SocketAddr = match raw.to_socket_addrs() {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr,
            None       => { return Err(DriverError::MissingAddress{ raw }); },
        },
        Err(err) => { return Err(DriverError::AddressResolveError{ raw, err }); },
    };
    let listener: TcpListener = match TcpListener::bind(bind).await {
        Ok(listener) => listener,
        Err(err)     => { return Err(DriverError::BindError{ raw, err }); },
    };
    let port: u16 = listener.local_addr().map(|addr| addr.port()).unwrap_or(opts.port);
    let endpoint: String = format!("{}:{}", opts.host, port);

    // Wire the pieces together
    let scheduler: SchedulerHandle = Scheduler::start(job, opts.timing, Arc::new(HttpSlaveTransport::new()));
    let store: Arc<BucketStore> = Arc::new(BucketStore::new(&opts.tmpdir, job));
    let state: Arc<MasterState> = Arc::new(MasterState {
        job,
        scheduler   : scheduler.clone(),
        store       : store.clone(),
        slaves_seen : AtomicU32::new(0),
    });
    tokio::spawn(warp::serve(server::routes(state.clone())).run_incoming(TcpListenerStream::new(listener)));
    info!("Master serving on '{}'", endpoint);

    // Optionally hold the run-method until enough slaves showed up
    if opts.timing_slaves > 0 {
        info!("Waiting for {} slave(s) to register...", opts.timing_slaves);
        while state.slaves_seen.load(Ordering::SeqCst) < opts.timing_slaves {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    // Hand control to the user program
    let handle: Job = Job {
        scheduler    : scheduler.clone(),
        program      : program.clone(),
        store        : store.clone(),
        endpoint,
        client       : Client::new(),
        abort_reason : Mutex::new(None),
    };
    let result: Result<(), Box<dyn std::error::Error + Send + Sync>> = tokio::select! {
        result = program.run(&handle) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; shutting down");
            Err("interrupted by signal".into())
        },
    };

    // Clean shutdown, whatever happened above
    scheduler.shutdown().await;
    if let Err(err) = store.clean() {
        warn!("Failed to clean scratch directory '{}': {}", store.root().display(), err);
    }

    // A scheduler-detected abort outranks whatever the run-method made of it
    if let Some(reason) = handle.abort_reason() {
        error!("{}", reason);
        return Err(DriverError::Fatal{ reason });
    }
    match result {
        Ok(_)    => { info!("Job {} finished", job); Ok(()) },
        Err(err) => Err(DriverError::UserError{ err }),
    }
}
