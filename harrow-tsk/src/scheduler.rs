//  SCHEDULER.rs
//    by Lut99
//
//  Created:
//    08 Mar 2023, 09:12:40
//  Last edited:
//    21 Jun 2023, 10:55:33
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the scheduler: a single event loop that exclusively owns
//!   the dataset graph, the task table, the ready queues and the slave
//!   set. Everything else talks to it through a [`SchedulerHandle`].
//!
//!   The loop never suspends on I/O itself: slave RPCs are spawned off
//!   and come back as events, so scheduling decisions stay serialized.
//

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};

use harrow_cfg::node::TimingConfig;
use specifications::data::{DatasetId, DatasetKind, DatasetSpec, JobId};
use specifications::driving::{HeartbeatReply, HeartbeatRequest, ReportDoneReply, ReportDoneRequest, ReportFailedRequest, SlaveId};
use specifications::errors::{JobError, SubmitError};
use specifications::tasks::{BucketAddr, TaskCoord, TaskDescriptor, TaskInput};
use specifications::working::AssignReply;

use crate::errors::TransportError;
use crate::graph::{DatasetGraph, DatasetNode, DatasetState};
use crate::queue::ReadyQueue;
use crate::slaves::{SlaveInfo, SlaveSet};
use crate::spec::SlaveTransport;
use crate::tasks::{Task, TaskData, TaskState};


/***** CONSTANTS *****/
/// How often the loop checks heartbeat deadlines and waiter timeouts.
const TICK_INTERVAL: Duration = Duration::from_millis(250);


/***** HELPER FUNCTIONS *****/
/// Extracts the `host:port` a bucket URL is served from.
fn url_endpoint(url: &str) -> Option<&str> {
    let rest: &str = url.strip_prefix("http://").or_else(|| url.strip_prefix("https://"))?;
    rest.split('/').next()
}


/***** AUXILLARY *****/
/// The events the scheduler loop processes.
enum Event {
    // Job-surface side
    /// Register a new dataset.
    Submit{ spec: DatasetSpec, reply: oneshot::Sender<Result<DatasetId, SubmitError>> },
    /// Advertise the pre-partitioned buckets of a local source, completing it.
    AdvertiseLocal{ id: DatasetId, buckets: Vec<String>, reply: oneshot::Sender<Result<(), JobError>> },
    /// Block until one of the given datasets completes.
    Wait{ ids: Vec<DatasetId>, timeout: Option<Duration>, reply: oneshot::Sender<Result<Vec<DatasetId>, JobError>> },
    /// Query a dataset's completion fraction.
    Progress{ id: DatasetId, reply: oneshot::Sender<Result<f64, JobError>> },
    /// Close a dataset.
    Close{ id: DatasetId, reply: oneshot::Sender<Result<(), JobError>> },
    /// Query the outputs of a complete dataset, in split order.
    Outputs{ id: DatasetId, reply: oneshot::Sender<Result<Vec<Vec<TaskInput>>, JobError>> },

    // Slave side
    /// A slave announces itself.
    Register{ endpoint: String, capacity: u32, reply: oneshot::Sender<SlaveId> },
    /// A slave reports a completed attempt.
    ReportDone{ req: ReportDoneRequest, reply: oneshot::Sender<ReportDoneReply> },
    /// A slave reports a failed attempt.
    ReportFailed{ req: ReportFailedRequest, reply: oneshot::Sender<()> },
    /// A slave heartbeats.
    Heartbeat{ req: HeartbeatRequest, reply: oneshot::Sender<HeartbeatReply> },

    // Internal
    /// A spawned assign RPC finished.
    AssignOutcome{ slave: SlaveId, coord: TaskCoord, attempt: u32, result: Result<AssignReply, TransportError> },
    /// Stop the loop (after telling the slaves to quit).
    Shutdown{ reply: oneshot::Sender<()> },
}

/// A registered `wait()` call.
struct Waiter {
    /// The datasets waited on.
    ids      : Vec<DatasetId>,
    /// When to give up and answer with whatever is complete.
    deadline : Option<Instant>,
    /// The reply channel.
    reply    : oneshot::Sender<Result<Vec<DatasetId>, JobError>>,
}


/***** LIBRARY *****/
/// The clonable handle with which the rest of the master talks to the scheduler loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    /// The sending end of the loop's event channel.
    tx : mpsc::Sender<Event>,
}

impl SchedulerHandle {
    /// Sends an event, resolving its oneshot reply.
    async fn call<T>(&self, event: Event, rx: oneshot::Receiver<T>) -> Option<T> {
        if self.tx.send(event).await.is_err() { return None; }
        rx.await.ok()
    }

    /// Registers a new dataset. Non-blocking; validation errors are returned synchronously.
    pub async fn submit(&self, spec: DatasetSpec) -> Result<DatasetId, SubmitError> {
        let (tx, rx) = oneshot::channel();
        self.call(Event::Submit{ spec, reply: tx }, rx).await.unwrap_or(Err(SubmitError::SchedulerDown))
    }

    /// Completes a local source by advertising its pre-partitioned bucket URLs (one per split, in
    /// split order; empty for an empty source).
    pub async fn advertise_local(&self, id: DatasetId, buckets: Vec<String>) -> Result<(), JobError> {
        let (tx, rx) = oneshot::channel();
        self.call(Event::AdvertiseLocal{ id, buckets, reply: tx }, rx).await.unwrap_or(Err(JobError::SchedulerDown))
    }

    /// Blocks until at least one of the given datasets is complete, the timeout elapses or the job
    /// aborts.
    pub async fn wait(&self, ids: Vec<DatasetId>, timeout: Option<Duration>) -> Result<Vec<DatasetId>, JobError> {
        let (tx, rx) = oneshot::channel();
        self.call(Event::Wait{ ids, timeout, reply: tx }, rx).await.unwrap_or(Err(JobError::SchedulerDown))
    }

    /// Returns the completion fraction of the given dataset.
    pub async fn progress(&self, id: DatasetId) -> Result<f64, JobError> {
        let (tx, rx) = oneshot::channel();
        self.call(Event::Progress{ id, reply: tx }, rx).await.unwrap_or(Err(JobError::SchedulerDown))
    }

    /// Closes the given dataset. Closing twice is a no-op.
    pub async fn close(&self, id: DatasetId) -> Result<(), JobError> {
        let (tx, rx) = oneshot::channel();
        self.call(Event::Close{ id, reply: tx }, rx).await.unwrap_or(Err(JobError::SchedulerDown))
    }

    /// Returns the outputs of a complete dataset: one entry per task (in split order), each
    /// listing that task's outputs in partition order.
    pub async fn outputs(&self, id: DatasetId) -> Result<Vec<Vec<TaskInput>>, JobError> {
        let (tx, rx) = oneshot::channel();
        self.call(Event::Outputs{ id, reply: tx }, rx).await.unwrap_or(Err(JobError::SchedulerDown))
    }

    /// Registers a slave.
    pub async fn register(&self, endpoint: String, capacity: u32) -> Result<SlaveId, JobError> {
        let (tx, rx) = oneshot::channel();
        self.call(Event::Register{ endpoint, capacity, reply: tx }, rx).await.ok_or(JobError::SchedulerDown)
    }

    /// Processes a completion report.
    pub async fn report_done(&self, req: ReportDoneRequest) -> Result<ReportDoneReply, JobError> {
        let (tx, rx) = oneshot::channel();
        self.call(Event::ReportDone{ req, reply: tx }, rx).await.ok_or(JobError::SchedulerDown)
    }

    /// Processes a failure report.
    pub async fn report_failed(&self, req: ReportFailedRequest) -> Result<(), JobError> {
        let (tx, rx) = oneshot::channel();
        self.call(Event::ReportFailed{ req, reply: tx }, rx).await.ok_or(JobError::SchedulerDown)
    }

    /// Processes a heartbeat.
    pub async fn heartbeat(&self, req: HeartbeatRequest) -> Result<HeartbeatReply, JobError> {
        let (tx, rx) = oneshot::channel();
        self.call(Event::Heartbeat{ req, reply: tx }, rx).await.ok_or(JobError::SchedulerDown)
    }

    /// Tells the slaves to quit and stops the scheduler loop.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        self.call(Event::Shutdown{ reply: tx }, rx).await;
    }
}



/// The scheduler loop state. Constructed through [`Scheduler::start()`].
pub struct Scheduler {
    /// The job everything belongs to.
    job       : JobId,
    /// The timing and retry knobs.
    timing    : TimingConfig,
    /// How we reach slaves.
    transport : Arc<dyn SlaveTransport>,

    /// The dataset graph.
    graph   : DatasetGraph,
    /// The ready queues.
    queue   : ReadyQueue,
    /// The registered slaves.
    slaves  : SlaveSet,
    /// The outstanding `wait()` calls.
    waiters : Vec<Waiter>,
    /// The abort reason, once the job has fatally failed.
    aborted : Option<String>,

    /// Our own sender, for events from spawned RPCs.
    tx : mpsc::Sender<Event>,
    /// The receiving end of the event channel.
    rx : mpsc::Receiver<Event>,
}

impl Scheduler {
    /// Starts a scheduler loop for the given job.
    ///
    /// # Arguments
    /// - `job`: The job identifier.
    /// - `timing`: The timing and retry knobs.
    /// - `transport`: How to reach slaves.
    ///
    /// # Returns
    /// The [`SchedulerHandle`] with which to talk to the loop.
    pub fn start(job: JobId, timing: TimingConfig, transport: Arc<dyn SlaveTransport>) -> SchedulerHandle {
        let (tx, rx) = mpsc::channel(256);
        let this: Self = Self {
            job,
            timing,
            transport,
            graph   : DatasetGraph::new(),
            queue   : ReadyQueue::new(),
            slaves  : SlaveSet::new(),
            waiters : vec![],
            aborted : None,
            tx      : tx.clone(),
            rx,
        };
        tokio::spawn(this.run());
        SchedulerHandle{ tx }
    }

    /// The loop itself.
    async fn run(mut self) {
        info!("Scheduler for job {} is up", self.job);
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(Event::Shutdown{ reply }) => {
                        self.quit_slaves();
                        let _ = reply.send(());
                        break;
                    },
                    Some(event) => self.handle(event),
                    None        => { break; },
                },
                _ = ticker.tick() => {
                    self.check_slaves();
                    self.expire_waiters();
                },
            }
        }
        debug!("Scheduler for job {} has stopped", self.job);
    }

    /// Dispatches one event to its handler.
    fn handle(&mut self, event: Event) {
        match event {
            Event::Submit{ spec, reply }               => { let _ = reply.send(self.handle_submit(spec)); },
            Event::AdvertiseLocal{ id, buckets, reply } => { let _ = reply.send(self.handle_advertise_local(id, buckets)); },
            Event::Wait{ ids, timeout, reply }         => self.handle_wait(ids, timeout, reply),
            Event::Progress{ id, reply }               => { let _ = reply.send(self.handle_progress(id)); },
            Event::Close{ id, reply }                  => { let _ = reply.send(self.handle_close(id)); },
            Event::Outputs{ id, reply }                => { let _ = reply.send(self.handle_outputs(id)); },
            Event::Register{ endpoint, capacity, reply } => { let _ = reply.send(self.handle_register(endpoint, capacity)); },
            Event::ReportDone{ req, reply }            => { let _ = reply.send(self.handle_report_done(req)); },
            Event::ReportFailed{ req, reply }          => { self.handle_report_failed(req); let _ = reply.send(()); },
            Event::Heartbeat{ req, reply }             => { let _ = reply.send(self.handle_heartbeat(req)); },
            Event::AssignOutcome{ slave, coord, attempt, result } => self.handle_assign_outcome(slave, coord, attempt, result),
            Event::Shutdown{ .. }                      => unreachable!(),
        }
    }



    /* JOB SURFACE */
    /// Handles a dataset submission.
    fn handle_submit(&mut self, spec: DatasetSpec) -> Result<DatasetId, SubmitError> {
        if self.aborted.is_some() { return Err(SubmitError::SchedulerDown); }

        let kind: DatasetKind = spec.kind;
        let id: DatasetId = self.graph.submit(spec)?;
        info!("Submitted {} dataset {}", kind, id);

        // File sources are complete the moment they exist: every URL is a zero-compute task
        if kind == DatasetKind::Files {
            let node: &mut DatasetNode = self.graph.get_mut(id).unwrap();
            node.tasks = node.spec.urls.iter().enumerate()
                .map(|(i, url)| Task::completed(TaskCoord::new(id, i as u32), TaskData::SourceUrl(url.clone())))
                .collect();
            node.state = DatasetState::Complete;
            info!("Dataset {} is complete ({} source tasks)", id, node.tasks.len());
        }

        self.on_graph_change();
        Ok(id)
    }

    /// Completes a local source with its advertised partition buckets.
    fn handle_advertise_local(&mut self, id: DatasetId, buckets: Vec<String>) -> Result<(), JobError> {
        let node: &mut DatasetNode = match self.graph.get_mut(id) {
            Some(node) => node,
            None       => { return Err(JobError::UnknownDataset{ id }); },
        };
        if node.spec.kind != DatasetKind::Local || node.state != DatasetState::Submitted {
            return Err(JobError::NotComplete{ id });
        }

        node.tasks = buckets.into_iter().enumerate()
            .map(|(i, url)| Task::completed(TaskCoord::new(id, i as u32), TaskData::LocalBucket(url)))
            .collect();
        node.state = DatasetState::Complete;
        info!("Dataset {} is complete ({} advertised partitions)", id, node.tasks.len());

        self.on_graph_change();
        Ok(())
    }

    /// Handles a `wait()` call: answers immediately when possible, registers a waiter otherwise.
    fn handle_wait(&mut self, ids: Vec<DatasetId>, timeout: Option<Duration>, reply: oneshot::Sender<Result<Vec<DatasetId>, JobError>>) {
        if let Some(reason) = &self.aborted {
            let _ = reply.send(Err(JobError::Aborted{ reason: reason.clone() }));
            return;
        }
        for id in &ids {
            if self.graph.get(*id).is_none() {
                let _ = reply.send(Err(JobError::UnknownDataset{ id: *id }));
                return;
            }
            self.graph.demand(*id);
        }

        // The new demand may unlock materializations (and even completions)
        self.on_graph_change();

        let complete: Vec<DatasetId> = self.complete_subset(&ids);
        if !complete.is_empty() || timeout == Some(Duration::ZERO) {
            let _ = reply.send(Ok(complete));
            return;
        }
        self.waiters.push(Waiter {
            ids,
            deadline : timeout.map(|t| Instant::now() + t),
            reply,
        });
    }

    /// Handles a `progress()` query.
    fn handle_progress(&mut self, id: DatasetId) -> Result<f64, JobError> {
        match self.graph.get(id) {
            Some(node) => Ok(node.progress()),
            None       => Err(JobError::UnknownDataset{ id }),
        }
    }

    /// Handles a `close()` call: marks the dataset closed, cancels its still-pending tasks and
    /// garbage-collects whatever has become eligible.
    fn handle_close(&mut self, id: DatasetId) -> Result<(), JobError> {
        if self.graph.get(id).is_none() { return Err(JobError::UnknownDataset{ id }); }
        if !self.graph.close(id) { return Ok(()); }
        info!("Dataset {} closed", id);

        // Pending tasks of a closed dataset will never run
        self.queue.remove_dataset(id);

        self.collect_garbage();
        Ok(())
    }

    /// Handles an `outputs()` query for a complete dataset.
    fn handle_outputs(&mut self, id: DatasetId) -> Result<Vec<Vec<TaskInput>>, JobError> {
        self.graph.demand(id);
        self.on_graph_change();

        let node: &DatasetNode = match self.graph.get(id) {
            Some(node) => node,
            None       => { return Err(JobError::UnknownDataset{ id }); },
        };
        if node.state != DatasetState::Complete {
            if let Some(reason) = &self.aborted { return Err(JobError::Aborted{ reason: reason.clone() }); }
            return Err(JobError::NotComplete{ id });
        }

        let mut outputs: Vec<Vec<TaskInput>> = Vec::with_capacity(node.tasks.len());
        for task in &node.tasks {
            match task.data.as_ref() {
                Some(TaskData::Buckets{ urls, .. }) => {
                    outputs.push(urls.iter().enumerate().map(|(split, url)| TaskInput::Bucket {
                        addr             : BucketAddr::new(id, task.coord.split, split as u32),
                        url              : url.clone(),
                        key_serializer   : node.spec.key_serializer.clone(),
                        value_serializer : node.spec.value_serializer.clone(),
                    }).collect());
                },
                Some(TaskData::SourceUrl(url))   => { outputs.push(vec![ TaskInput::Url(url.clone()) ]); },
                Some(TaskData::LocalBucket(url)) => {
                    outputs.push(vec![ TaskInput::Bucket {
                        addr             : BucketAddr::new(id, task.coord.split, 0),
                        url              : url.clone(),
                        key_serializer   : node.spec.key_serializer.clone(),
                        value_serializer : node.spec.value_serializer.clone(),
                    } ]);
                },
                Some(TaskData::Empty) | None     => { outputs.push(vec![]); },
            }
        }
        Ok(outputs)
    }



    /* SLAVE SIDE */
    /// Handles a slave registration.
    fn handle_register(&mut self, endpoint: String, capacity: u32) -> SlaveId {
        let id: SlaveId = self.slaves.register(&endpoint, capacity);
        info!("Registered {} at '{}' (capacity {})", id, endpoint, capacity);
        self.dispatch();
        id
    }

    /// Handles a completion report.
    fn handle_report_done(&mut self, req: ReportDoneRequest) -> ReportDoneReply {
        // The report must match the current attempt on that exact slave; anything else is a
        // duplicate or superseded completion and the slave should drop its buckets. A fast slave
        // may report before our own assign RPC outcome is processed, so Assigned counts too.
        let out_splits: u32 = match self.graph.get(req.coord.dataset) {
            Some(node) => match node.task(req.coord.split) {
                Some(task) if task.state.slave() == Some(req.slave) && task.attempt == req.attempt => node.out_splits.unwrap_or(node.spec.num_splits),
                _ => {
                    debug!("Discarding completion report of {} from {} (attempt {})", req.coord, req.slave, req.attempt);
                    return ReportDoneReply::Discard;
                },
            },
            None => { return ReportDoneReply::Discard; },
        };

        // Order the advertised buckets by destination split
        let mut urls: Vec<Option<String>> = vec![None; out_splits as usize];
        for output in req.outputs {
            if (output.split as usize) < urls.len() { urls[output.split as usize] = Some(output.url); }
        }
        if urls.iter().any(|url| url.is_none()) {
            warn!("Completion report of {} from {} does not cover all {} splits; discarding", req.coord, req.slave, out_splits);
            return ReportDoneReply::Discard;
        }
        let urls: Vec<String> = urls.into_iter().map(Option::unwrap).collect();

        // Record the completion
        let node: &mut DatasetNode = self.graph.get_mut(req.coord.dataset).unwrap();
        let task: &mut Task = node.task_mut(req.coord.split).unwrap();
        task.state = TaskState::Done;
        task.data = Some(TaskData::Buckets{ urls, producer: req.slave });
        info!("{} (attempt {}) is complete on {}", req.coord, req.attempt, req.slave);

        let complete: bool = node.tasks.iter().all(Task::is_done);
        if complete {
            node.state = DatasetState::Complete;
            info!("Dataset {} is complete", req.coord.dataset);
        }

        // Update the slave's bookkeeping: it no longer runs the task, and it holds the outputs
        // plus whatever inputs it reported caching
        if let Some(slave) = self.slaves.get_mut(req.slave) {
            slave.assigned.remove(&req.coord);
            for split in 0..out_splits {
                slave.holds.insert(BucketAddr::new(req.coord.dataset, req.coord.split, split));
            }
            for addr in req.cached {
                slave.holds.insert(addr);
            }
        }

        self.on_graph_change();
        ReportDoneReply::Ack
    }

    /// Handles a failure report.
    fn handle_report_failed(&mut self, req: ReportFailedRequest) {
        let valid: bool = match self.graph.get(req.coord.dataset).and_then(|node| node.task(req.coord.split)) {
            // As with completions, a fast slave may report before the assign outcome lands
            Some(task) => task.state.slave() == Some(req.slave) && task.attempt == req.attempt,
            None       => false,
        };
        if !valid {
            debug!("Ignoring stale failure report of {} from {} (attempt {})", req.coord, req.slave, req.attempt);
            return;
        }
        if let Some(slave) = self.slaves.get_mut(req.slave) { slave.assigned.remove(&req.coord); }

        if let Some(addr) = req.stale_input {
            // Not the task's fault: its input went missing. Invalidate the producer and let both
            // re-run; the consumer keeps its attempt count.
            warn!("{} reported missing input {}; re-running its producer", req.coord, addr);
            self.invalidate_completion(addr.dataset, addr.source);

            let task: &mut Task = self.graph.get_mut(req.coord.dataset).unwrap().task_mut(req.coord.split).unwrap();
            task.state = TaskState::Pending;
            self.queue.push(req.coord);
            self.dispatch();
            return;
        }

        let retry_bound: u32 = self.timing.retry_bound;
        let task: &mut Task = self.graph.get_mut(req.coord.dataset).unwrap().task_mut(req.coord.split).unwrap();
        task.attempt += 1;
        warn!("{} failed on {} (attempt {} of {}): {}", req.coord, req.slave, task.attempt, retry_bound, req.reason);

        if task.attempt >= retry_bound {
            task.state = TaskState::FailedFatal;
            self.abort(format!("{} failed {} times; last reason: {}", req.coord, retry_bound, req.reason));
            return;
        }

        task.state = TaskState::Pending;
        self.queue.push(req.coord);
        self.dispatch();
    }

    /// Handles a heartbeat: refreshes the deadline and answers with any tasks the slave should no
    /// longer be running.
    fn handle_heartbeat(&mut self, req: HeartbeatRequest) -> HeartbeatReply {
        if !self.slaves.heard_from(req.slave) {
            // Unknown or lost: whatever it runs has been reassigned by now
            debug!("Heartbeat from unknown or lost {}; telling it to drop everything", req.slave);
            return HeartbeatReply{ reassign: req.running };
        }

        let reassign: Vec<TaskCoord> = req.running.into_iter()
            .filter(|coord| {
                match self.graph.get(coord.dataset).and_then(|node| node.task(coord.split)) {
                    Some(task) => task.state.slave() != Some(req.slave),
                    None       => true,
                }
            })
            .collect();
        HeartbeatReply{ reassign }
    }

    /// Handles the outcome of a spawned assign RPC.
    fn handle_assign_outcome(&mut self, slave: SlaveId, coord: TaskCoord, attempt: u32, result: Result<AssignReply, TransportError>) {
        // The offer may have been overtaken by a slave loss or an abort
        let current: Option<&Task> = self.graph.get(coord.dataset).and_then(|node| node.task(coord.split));
        let still_ours: bool = matches!(current, Some(task) if task.state == TaskState::Assigned(slave) && task.attempt == attempt);
        if !still_ours {
            debug!("Dropping stale assign outcome of {} for {}", coord, slave);
            return;
        }

        match result {
            Ok(AssignReply::Accepted) => {
                let task: &mut Task = self.graph.get_mut(coord.dataset).unwrap().task_mut(coord.split).unwrap();
                task.state = TaskState::Running(slave);
                info!("{} (attempt {}) is running on {}", coord, attempt, slave);
            },
            Ok(AssignReply::Busy) => {
                debug!("{} is busy; requeueing {}", slave, coord);
                if let Some(info) = self.slaves.get_mut(slave) { info.assigned.remove(&coord); }
                let task: &mut Task = self.graph.get_mut(coord.dataset).unwrap().task_mut(coord.split).unwrap();
                task.state = TaskState::Pending;
                self.queue.push(coord);
                self.dispatch();
            },
            Err(err) => {
                // The transport has already retried; treat the slave as gone
                error!("{}", err);
                self.slave_lost(slave);
            },
        }
    }



    /* INTERNALS */
    /// Runs the materialization pass, notifies waiters and dispatches: called after anything that
    /// may have changed graph state.
    fn on_graph_change(&mut self) {
        loop {
            let ready: Vec<DatasetId> = self.graph.ready_to_materialize();
            let ready: Vec<DatasetId> = ready.into_iter().filter(|id| !self.graph.get(*id).unwrap().closed).collect();
            if ready.is_empty() { break; }
            for id in ready {
                self.materialize(id);
            }
        }
        self.notify_waiters();
        self.dispatch();
    }

    /// Materializes a dataset whose parents are all complete: fixes its output partition count and
    /// creates its tasks.
    fn materialize(&mut self, id: DatasetId) {
        // Fix the partition count: the first consumer's split count, or our own
        let node: &DatasetNode = self.graph.get(id).unwrap();
        let num_splits: u32 = node.spec.num_splits;
        let out_splits: u32 = node.children.first()
            .map(|child| self.graph.get(*child).unwrap().spec.num_splits)
            .unwrap_or(num_splits);

        // Create the tasks; ones with no input at all complete on the spot
        let mut tasks: Vec<Task> = Vec::with_capacity(num_splits as usize);
        let mut pending: Vec<TaskCoord> = vec![];
        for split in 0..num_splits {
            let coord: TaskCoord = TaskCoord::new(id, split);
            if self.build_inputs(id, split).is_empty() {
                tasks.push(Task::completed(coord, TaskData::Empty));
            } else {
                tasks.push(Task::new(coord));
                pending.push(coord);
            }
        }

        let complete: bool = pending.is_empty();
        let node: &mut DatasetNode = self.graph.get_mut(id).unwrap();
        node.out_splits = Some(out_splits);
        node.tasks = tasks;
        node.state = if complete { DatasetState::Complete } else { DatasetState::Materialized };
        info!("Dataset {} materialized: {} tasks, {} output partitions each", id, num_splits, out_splits);
        if complete { info!("Dataset {} is complete (no non-empty inputs)", id); }

        for coord in pending {
            self.queue.push(coord);
        }
    }

    /// Builds the input list of one task from the current graph state.
    ///
    /// Source parents contribute their split-aligned item; computed parents contribute their
    /// shuffle slice (bucket `split` of every parent task). Empty producers contribute nothing.
    fn build_inputs(&self, id: DatasetId, split: u32) -> Vec<TaskInput> {
        let node: &DatasetNode = self.graph.get(id).unwrap();
        let mut inputs: Vec<TaskInput> = vec![];
        for parent_id in &node.spec.sources {
            let parent: &DatasetNode = self.graph.get(*parent_id).unwrap();
            if parent.spec.kind.is_source() {
                if let Some(task) = parent.task(split) {
                    match task.data.as_ref() {
                        Some(TaskData::SourceUrl(url))   => { inputs.push(TaskInput::Url(url.clone())); },
                        Some(TaskData::LocalBucket(url)) => {
                            inputs.push(TaskInput::Bucket {
                                addr             : BucketAddr::new(*parent_id, split, 0),
                                url              : url.clone(),
                                key_serializer   : parent.spec.key_serializer.clone(),
                                value_serializer : parent.spec.value_serializer.clone(),
                            });
                        },
                        _ => {},
                    }
                }
            } else {
                for task in &parent.tasks {
                    match task.data.as_ref() {
                        Some(TaskData::Buckets{ urls, .. }) => {
                            inputs.push(TaskInput::Bucket {
                                addr             : BucketAddr::new(*parent_id, task.coord.split, split),
                                url              : urls[split as usize].clone(),
                                key_serializer   : parent.spec.key_serializer.clone(),
                                value_serializer : parent.spec.value_serializer.clone(),
                            });
                        },
                        _ => {},
                    }
                }
            }
        }
        inputs
    }

    /// Offers queued tasks to idle slaves, preferring local inputs.
    fn dispatch(&mut self) {
        if self.aborted.is_some() { return; }

        loop {
            let mut offered: bool = false;
            let candidates: Vec<SlaveId> = self.slaves.candidates().map(|info| info.id).collect();
            for slave_id in candidates {
                // Borrow juggling: compute per-task locality against this slave's held buckets
                let holds: std::collections::HashSet<BucketAddr> = match self.slaves.get(slave_id) {
                    Some(info) if info.free_capacity() > 0 => info.holds.clone(),
                    _ => { continue; },
                };

                let graph: &DatasetGraph = &self.graph;
                let parents_ok = |coord: TaskCoord| -> bool {
                    graph.get(coord.dataset)
                        .map(|node| node.spec.sources.iter().all(|parent| graph.get(*parent).map(|p| p.state == DatasetState::Complete).unwrap_or(false)))
                        .unwrap_or(false)
                };
                let picked: Option<TaskCoord> = self.queue.pick(|coord| {
                    if !parents_ok(coord) { return None; }
                    let locality: u32 = graph.get(coord.dataset)
                        .map(|node| {
                            node.spec.sources.iter().map(|parent_id| {
                                let parent: &DatasetNode = graph.get(*parent_id).unwrap();
                                if parent.spec.kind.is_source() { return 0; }
                                parent.tasks.iter().filter(|task| holds.contains(&BucketAddr::new(*parent_id, task.coord.split, coord.split))).count() as u32
                            }).sum()
                        })
                        .unwrap_or(0);
                    Some(locality)
                });

                if let Some(coord) = picked {
                    self.offer(slave_id, coord);
                    offered = true;
                }
            }
            if !offered { break; }
        }
    }

    /// Sends one assignment offer to one slave.
    fn offer(&mut self, slave: SlaveId, coord: TaskCoord) {
        let descriptor: TaskDescriptor = self.make_descriptor(coord);
        let attempt: u32 = descriptor.attempt;
        let endpoint: String = self.slaves.get(slave).unwrap().endpoint.clone();

        let task: &mut Task = self.graph.get_mut(coord.dataset).unwrap().task_mut(coord.split).unwrap();
        task.state = TaskState::Assigned(slave);
        self.slaves.get_mut(slave).unwrap().assigned.insert(coord);
        info!("{} (attempt {}) offered to {}", coord, attempt, slave);

        let transport: Arc<dyn SlaveTransport> = self.transport.clone();
        let tx: mpsc::Sender<Event> = self.tx.clone();
        tokio::spawn(async move {
            let result: Result<AssignReply, TransportError> = transport.assign(&endpoint, descriptor).await;
            let _ = tx.send(Event::AssignOutcome{ slave, coord, attempt, result }).await;
        });
    }

    /// Builds the descriptor for one task from the current graph state.
    fn make_descriptor(&self, coord: TaskCoord) -> TaskDescriptor {
        let node: &DatasetNode = self.graph.get(coord.dataset).unwrap();
        let task: &Task = node.task(coord.split).unwrap();
        TaskDescriptor {
            job              : self.job,
            coord,
            attempt          : task.attempt,
            generation       : task.generation,
            kind             : node.spec.kind,
            inputs           : self.build_inputs(coord.dataset, coord.split),
            out_splits       : node.out_splits.unwrap_or(node.spec.num_splits),
            outdir           : node.spec.outdir.clone(),
            parter           : node.spec.parter.clone(),
            mapper           : node.spec.mapper.clone(),
            reducer          : node.spec.reducer.clone(),
            combiner         : node.spec.combiner.clone(),
            key_serializer   : node.spec.key_serializer.clone(),
            value_serializer : node.spec.value_serializer.clone(),
        }
    }

    /// Invalidates the recorded completion of one task (its buckets are unfetchable): the task
    /// re-runs under a new generation and running consumers are pulled back.
    fn invalidate_completion(&mut self, dataset: DatasetId, source: u32) {
        let coord: TaskCoord = TaskCoord::new(dataset, source);
        let was_done: bool = match self.graph.get(dataset).and_then(|node| node.task(source)) {
            Some(task) => task.is_done(),
            None       => false,
        };
        if !was_done { return; }

        let node: &mut DatasetNode = self.graph.get_mut(dataset).unwrap();
        node.task_mut(source).unwrap().invalidate();
        if node.state == DatasetState::Complete {
            node.state = DatasetState::Materialized;
            info!("Dataset {} is no longer complete ({} must re-run)", dataset, coord);
        }
        let children: Vec<DatasetId> = node.children.clone();
        self.queue.push(coord);

        // No slave serves these buckets anymore
        for info in self.slaves.iter_mut() {
            info.holds.retain(|addr| !(addr.dataset == dataset && addr.source == source));
        }

        // Running consumers are reading stale data; pull them back (same attempt)
        for child_id in children {
            let child: &DatasetNode = self.graph.get(child_id).unwrap();
            let pull: Vec<(TaskCoord, SlaveId)> = child.tasks.iter()
                .filter_map(|task| task.state.slave().map(|slave| (task.coord, slave)))
                .collect();
            for (child_coord, slave) in pull {
                info!("Cancelling {} on {} (its input {} must re-run)", child_coord, slave, coord);
                self.cancel_on(slave, child_coord);
                let task: &mut Task = self.graph.get_mut(child_id).unwrap().task_mut(child_coord.split).unwrap();
                task.state = TaskState::Pending;
                if let Some(info) = self.slaves.get_mut(slave) { info.assigned.remove(&child_coord); }
                self.queue.push(child_coord);
            }
        }
    }

    /// Declares a slave lost: its in-flight work goes back to pending with the same attempt, and
    /// its completed outputs survive only where a replica exists.
    fn slave_lost(&mut self, id: SlaveId) {
        let info: &mut SlaveInfo = match self.slaves.get_mut(id) {
            Some(info) if !info.lost => info,
            _ => { return; },
        };
        info.lost = true;
        let in_flight: Vec<TaskCoord> = info.assigned.drain().collect();
        warn!("{} is lost; returning {} in-flight tasks to the queue", id, in_flight.len());

        // A lost slave is not the task's fault: same attempt, back in the queue
        for coord in in_flight {
            if let Some(task) = self.graph.get_mut(coord.dataset).and_then(|node| node.task_mut(coord.split)) {
                if task.state.slave() == Some(id) {
                    task.state = TaskState::Pending;
                    self.queue.push(coord);
                }
            }
        }

        // Completed tasks whose buckets lived (only) there must re-run; ones with a full replica
        // set are re-pointed instead
        let produced: Vec<(DatasetId, u32, u32)> = self.graph.iter()
            .flat_map(|node| node.tasks.iter().filter_map(move |task| {
                match task.data.as_ref() {
                    Some(TaskData::Buckets{ producer, urls }) if *producer == id => Some((node.id, task.coord.split, urls.len() as u32)),
                    _ => None,
                }
            }))
            .collect();
        for (dataset, source, out_splits) in produced {
            match self.find_full_replica(dataset, source, out_splits, id) {
                Some(replica) => {
                    let endpoint: String = self.slaves.get(replica).unwrap().endpoint.clone();
                    let urls: Vec<String> = (0..out_splits).map(|split| BucketAddr::new(dataset, source, split).url_on(&endpoint)).collect();
                    info!("Re-pointing buckets of {} to replica {}", TaskCoord::new(dataset, source), replica);
                    let task: &mut Task = self.graph.get_mut(dataset).unwrap().task_mut(source).unwrap();
                    task.data = Some(TaskData::Buckets{ urls, producer: replica });
                },
                None => {
                    self.invalidate_completion(dataset, source);
                },
            }
        }

        self.dispatch();
    }

    /// Finds a live slave (other than the lost one) holding every bucket of the given task.
    fn find_full_replica(&self, dataset: DatasetId, source: u32, out_splits: u32, except: SlaveId) -> Option<SlaveId> {
        self.slaves.live()
            .filter(|info| info.id != except)
            .find(|info| (0..out_splits).all(|split| info.holds.contains(&BucketAddr::new(dataset, source, split))))
            .map(|info| info.id)
    }

    /// Spawns a best-effort cancel RPC.
    fn cancel_on(&self, slave: SlaveId, coord: TaskCoord) {
        let endpoint: String = match self.slaves.get(slave) {
            Some(info) => info.endpoint.clone(),
            None       => { return; },
        };
        let transport: Arc<dyn SlaveTransport> = self.transport.clone();
        tokio::spawn(async move {
            if let Err(err) = transport.cancel(&endpoint, coord).await {
                warn!("{}", err);
            }
        });
    }

    /// Aborts the job: running tasks are cancelled, all datasets closed and every waiter receives
    /// the abort.
    fn abort(&mut self, reason: String) {
        if self.aborted.is_some() { return; }
        error!("Job {} aborted: {}", self.job, reason);
        self.aborted = Some(reason.clone());

        // Cancel everything in flight
        let running: Vec<(SlaveId, TaskCoord)> = self.slaves.live()
            .flat_map(|info| info.assigned.iter().map(move |coord| (info.id, *coord)))
            .collect();
        for (slave, coord) in running {
            self.cancel_on(slave, coord);
        }

        // Close all datasets and forget all queued work
        let ids: Vec<DatasetId> = self.graph.iter().map(|node| node.id).collect();
        for id in ids {
            self.graph.close(id);
            self.queue.remove_dataset(id);
        }

        // Anybody waiting learns about it now
        for waiter in self.waiters.drain(..) {
            let _ = waiter.reply.send(Err(JobError::Aborted{ reason: reason.clone() }));
        }
    }

    /// Garbage-collects buckets of datasets that are closed with no open dependents.
    fn collect_garbage(&mut self) {
        for id in self.graph.gc_eligible() {
            let node: &mut DatasetNode = self.graph.get_mut(id).unwrap();
            node.gc_done = true;

            // Slave-produced buckets live on their holders; local-source partitions live in the
            // master's own store, whose serving endpoint sits in the advertised URL
            let tasks: Vec<(TaskCoord, Option<String>)> = node.tasks.iter()
                .filter_map(|task| match task.data.as_ref() {
                    Some(TaskData::Buckets{ .. })    => Some((task.coord, None)),
                    Some(TaskData::LocalBucket(url)) => Some((task.coord, url_endpoint(url).map(String::from))),
                    _ => None,
                })
                .collect();
            if tasks.is_empty() { continue; }
            info!("Garbage-collecting {} tasks' buckets of dataset {}", tasks.len(), id);

            for (coord, serving) in tasks {
                // Every holder of any of this task's buckets gets the drop command
                let mut holders: Vec<String> = self.slaves.live()
                    .filter(|info| info.holds.iter().any(|addr| addr.dataset == id && addr.source == coord.split))
                    .map(|info| info.endpoint.clone())
                    .collect();
                holders.extend(serving);
                for endpoint in holders {
                    let transport: Arc<dyn SlaveTransport> = self.transport.clone();
                    tokio::spawn(async move {
                        if let Err(err) = transport.drop_bucket(&endpoint, coord).await {
                            warn!("{}", err);
                        }
                    });
                }
            }

            // Forget the hold records
            for info in self.slaves.iter_mut() {
                info.holds.retain(|addr| addr.dataset != id);
            }
        }
    }

    /// Answers every waiter for which a dataset has completed.
    fn notify_waiters(&mut self) {
        let graph: &DatasetGraph = &self.graph;
        let mut kept: Vec<Waiter> = vec![];
        for waiter in self.waiters.drain(..) {
            let complete: Vec<DatasetId> = waiter.ids.iter()
                .filter(|id| graph.get(**id).map(|node| node.state == DatasetState::Complete).unwrap_or(false))
                .copied()
                .collect();
            if !complete.is_empty() {
                let _ = waiter.reply.send(Ok(complete));
            } else {
                kept.push(waiter);
            }
        }
        self.waiters = kept;
    }

    /// Answers every waiter whose deadline has passed with whatever is complete (possibly
    /// nothing).
    fn expire_waiters(&mut self) {
        let now: Instant = Instant::now();
        let graph: &DatasetGraph = &self.graph;
        let mut kept: Vec<Waiter> = vec![];
        for waiter in self.waiters.drain(..) {
            if waiter.deadline.map(|deadline| now >= deadline).unwrap_or(false) {
                let complete: Vec<DatasetId> = waiter.ids.iter()
                    .filter(|id| graph.get(**id).map(|node| node.state == DatasetState::Complete).unwrap_or(false))
                    .copied()
                    .collect();
                let _ = waiter.reply.send(Ok(complete));
            } else {
                kept.push(waiter);
            }
        }
        self.waiters = kept;
    }

    /// Returns the complete subset of the given datasets, in the given order.
    fn complete_subset(&self, ids: &[DatasetId]) -> Vec<DatasetId> {
        ids.iter()
            .filter(|id| self.graph.get(**id).map(|node| node.state == DatasetState::Complete).unwrap_or(false))
            .copied()
            .collect()
    }

    /// Declares lost every slave whose heartbeat deadline has passed.
    fn check_slaves(&mut self) {
        for id in self.slaves.expired(self.timing.lost_after()) {
            warn!("{} missed its heartbeat deadline", id);
            self.slave_lost(id);
        }
    }

    /// Tells every live slave to quit (fire-and-forget, on shutdown).
    fn quit_slaves(&self) {
        for info in self.slaves.live() {
            let endpoint: String = info.endpoint.clone();
            let transport: Arc<dyn SlaveTransport> = self.transport.clone();
            tokio::spawn(async move {
                let _ = transport.quit(&endpoint).await;
            });
        }
    }
}


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use specifications::driving::TaskOutput;
    use specifications::functions::{DEFAULT_PARTER, DEFAULT_SERIALIZER};
    use specifications::working::SlaveStatus;

    use super::*;

    /// A transport that records every call and accepts every offer.
    #[derive(Default)]
    struct MockTransport {
        assigns : Mutex<Vec<(String, TaskDescriptor)>>,
        cancels : Mutex<Vec<(String, TaskCoord)>>,
        drops   : Mutex<Vec<(String, TaskCoord)>>,
        quits   : Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SlaveTransport for MockTransport {
        async fn assign(&self, endpoint: &str, task: TaskDescriptor) -> Result<AssignReply, TransportError> {
            self.assigns.lock().unwrap().push((endpoint.into(), task));
            Ok(AssignReply::Accepted)
        }
        async fn cancel(&self, endpoint: &str, coord: TaskCoord) -> Result<(), TransportError> {
            self.cancels.lock().unwrap().push((endpoint.into(), coord));
            Ok(())
        }
        async fn ping(&self, _endpoint: &str) -> Result<SlaveStatus, TransportError> {
            Ok(SlaveStatus{ running: vec![], scratch_bytes: 0 })
        }
        async fn drop_bucket(&self, endpoint: &str, coord: TaskCoord) -> Result<(), TransportError> {
            self.drops.lock().unwrap().push((endpoint.into(), coord));
            Ok(())
        }
        async fn quit(&self, endpoint: &str) -> Result<(), TransportError> {
            self.quits.lock().unwrap().push(endpoint.into());
            Ok(())
        }
    }

    impl MockTransport {
        /// Polls until at least `n` assignments were offered, then returns them all.
        async fn wait_assigns(&self, n: usize) -> Vec<(String, TaskDescriptor)> {
            for _ in 0..500 {
                {
                    let assigns = self.assigns.lock().unwrap();
                    if assigns.len() >= n { return assigns.clone(); }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("timed out waiting for {} assignment(s); got {}", n, self.assigns.lock().unwrap().len());
        }
    }

    fn files_spec(urls: &[&str]) -> DatasetSpec {
        DatasetSpec {
            kind             : DatasetKind::Files,
            sources          : vec![],
            urls             : urls.iter().map(|url| url.to_string()).collect(),
            num_splits       : urls.len() as u32,
            outdir           : None,
            parter           : DEFAULT_PARTER.into(),
            mapper           : None,
            reducer          : None,
            combiner         : None,
            key_serializer   : DEFAULT_SERIALIZER.into(),
            value_serializer : DEFAULT_SERIALIZER.into(),
        }
    }

    fn map_spec(input: DatasetId, splits: u32) -> DatasetSpec {
        DatasetSpec {
            kind             : DatasetKind::Map,
            sources          : vec![input],
            urls             : vec![],
            num_splits       : splits,
            outdir           : None,
            parter           : DEFAULT_PARTER.into(),
            mapper           : Some("m".into()),
            reducer          : None,
            combiner         : None,
            key_serializer   : DEFAULT_SERIALIZER.into(),
            value_serializer : DEFAULT_SERIALIZER.into(),
        }
    }

    fn reduce_spec(input: DatasetId, splits: u32) -> DatasetSpec {
        DatasetSpec {
            kind             : DatasetKind::Reduce,
            sources          : vec![input],
            urls             : vec![],
            num_splits       : splits,
            outdir           : None,
            parter           : DEFAULT_PARTER.into(),
            mapper           : None,
            reducer          : Some("r".into()),
            combiner         : None,
            key_serializer   : DEFAULT_SERIALIZER.into(),
            value_serializer : DEFAULT_SERIALIZER.into(),
        }
    }

    fn local_spec(splits: u32) -> DatasetSpec {
        DatasetSpec {
            kind             : DatasetKind::Local,
            sources          : vec![],
            urls             : vec![],
            num_splits       : splits,
            outdir           : None,
            parter           : DEFAULT_PARTER.into(),
            mapper           : None,
            reducer          : None,
            combiner         : None,
            key_serializer   : DEFAULT_SERIALIZER.into(),
            value_serializer : DEFAULT_SERIALIZER.into(),
        }
    }

    /// Builds a well-formed completion report for the given descriptor.
    fn done_report(slave: SlaveId, endpoint: &str, task: &TaskDescriptor) -> ReportDoneRequest {
        ReportDoneRequest {
            slave,
            coord   : task.coord,
            attempt : task.attempt,
            outputs : (0..task.out_splits).map(|split| TaskOutput {
                split,
                url : BucketAddr::new(task.coord.dataset, task.coord.split, split).url_on(endpoint),
            }).collect(),
            cached  : vec![],
        }
    }

    fn start(timing: TimingConfig) -> (SchedulerHandle, Arc<MockTransport>) {
        let transport: Arc<MockTransport> = Arc::new(MockTransport::default());
        let handle: SchedulerHandle = Scheduler::start(JobId::generate(), timing, transport.clone());
        (handle, transport)
    }

    #[tokio::test]
    async fn sources_complete_immediately() {
        let (handle, _transport) = start(TimingConfig::default());
        let files: DatasetId = handle.submit(files_spec(&["a.txt", "b.txt"])).await.unwrap();

        // wait(timeout = 0) answers immediately with whatever is complete
        assert_eq!(handle.wait(vec![files], Some(Duration::ZERO)).await.unwrap(), vec![files]);
        assert_eq!(handle.progress(files).await.unwrap(), 1.0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn map_over_files_runs_and_completes() {
        let (handle, transport) = start(TimingConfig::default());
        let files: DatasetId = handle.submit(files_spec(&["a.txt", "b.txt"])).await.unwrap();
        let map: DatasetId = handle.submit(map_spec(files, 2)).await.unwrap();

        let slave: SlaveId = handle.register("127.0.0.1:9001".into(), 2).await.unwrap();
        let waiter = tokio::spawn({ let handle = handle.clone(); async move { handle.wait(vec![map], None).await } });

        // Both map tasks are offered; their inputs are the aligned source URLs
        let assigns = transport.wait_assigns(2).await;
        for (_, task) in &assigns {
            assert_eq!(task.kind, DatasetKind::Map);
            assert_eq!(task.out_splits, 2);
            assert_eq!(task.inputs.len(), 1);
            assert!(matches!(&task.inputs[0], TaskInput::Url(url) if url.ends_with(".txt")));
        }

        for (_, task) in &assigns {
            assert_eq!(handle.report_done(done_report(slave, "127.0.0.1:9001", task)).await.unwrap(), ReportDoneReply::Ack);
        }
        assert_eq!(waiter.await.unwrap().unwrap(), vec![map]);
        assert_eq!(handle.progress(map).await.unwrap(), 1.0);

        // The outputs come back task-ordered, partition-ordered
        let outputs = handle.outputs(map).await.unwrap();
        assert_eq!(outputs.len(), 2);
        assert!(outputs.iter().all(|task| task.len() == 2));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn capacity_bounds_concurrent_assignments() {
        let (handle, transport) = start(TimingConfig::default());
        let files: DatasetId = handle.submit(files_spec(&["a.txt", "b.txt"])).await.unwrap();
        let map: DatasetId = handle.submit(map_spec(files, 2)).await.unwrap();

        let slave: SlaveId = handle.register("127.0.0.1:9001".into(), 1).await.unwrap();
        let _waiter = tokio::spawn({ let handle = handle.clone(); async move { handle.wait(vec![map], None).await } });

        // Capacity 1: only one task may be in flight
        let assigns = transport.wait_assigns(1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.assigns.lock().unwrap().len(), 1);

        // Completing it frees the slot for the second
        handle.report_done(done_report(slave, "127.0.0.1:9001", &assigns[0].1)).await.unwrap();
        transport.wait_assigns(2).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn retry_bound_exhaustion_aborts_the_job() {
        let (handle, transport) = start(TimingConfig::default());
        let files: DatasetId = handle.submit(files_spec(&["a.txt"])).await.unwrap();
        let map: DatasetId = handle.submit(map_spec(files, 1)).await.unwrap();

        let slave: SlaveId = handle.register("127.0.0.1:9001".into(), 1).await.unwrap();
        let waiter = tokio::spawn({ let handle = handle.clone(); async move { handle.wait(vec![map], None).await } });

        // Three attempts, each failing
        for attempt in 0..3 {
            let assigns = transport.wait_assigns(attempt as usize + 1).await;
            let task: &TaskDescriptor = &assigns.last().unwrap().1;
            assert_eq!(task.attempt, attempt);
            handle.report_failed(ReportFailedRequest {
                slave,
                coord       : task.coord,
                attempt     : task.attempt,
                reason      : "mapper raised".into(),
                stale_input : None,
            }).await.unwrap();
        }

        // The job aborts; the waiter learns, and no further attempts are offered
        assert!(matches!(waiter.await.unwrap(), Err(JobError::Aborted{ .. })));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.assigns.lock().unwrap().len(), 3);
        assert!(matches!(handle.wait(vec![map], None).await, Err(JobError::Aborted{ .. })));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn lost_slave_reassigns_with_same_attempt() {
        // One-second heartbeats, one miss allowed: silence for a second is fatal
        let timing: TimingConfig = TimingConfig{ heartbeat_interval: 1, heartbeat_misses: 1, retry_bound: 3 };
        let (handle, transport) = start(timing);
        let files: DatasetId = handle.submit(files_spec(&["a.txt", "b.txt"])).await.unwrap();
        let map: DatasetId = handle.submit(map_spec(files, 2)).await.unwrap();

        let alive: SlaveId = handle.register("127.0.0.1:9001".into(), 1).await.unwrap();
        let doomed: SlaveId = handle.register("127.0.0.1:9002".into(), 1).await.unwrap();

        // Keep the first slave alive
        let beats = tokio::spawn({
            let handle = handle.clone();
            async move {
                loop {
                    let _ = handle.heartbeat(HeartbeatRequest{ slave: alive, running: vec![] }).await;
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }
        });

        let waiter = tokio::spawn({ let handle = handle.clone(); async move { handle.wait(vec![map], None).await } });
        let assigns = transport.wait_assigns(2).await;

        // The live slave finishes its task; the doomed one never reports
        let on_alive: &TaskDescriptor = assigns.iter().find(|(endpoint, _)| endpoint.as_str() == "127.0.0.1:9001").map(|(_, task)| task).unwrap();
        let on_doomed: TaskCoord = assigns.iter().find(|(endpoint, _)| endpoint.as_str() == "127.0.0.1:9002").map(|(_, task)| task.coord).unwrap();
        handle.report_done(done_report(alive, "127.0.0.1:9001", on_alive)).await.unwrap();

        // After the deadline, the doomed slave's task is re-offered to the survivor, attempt unchanged
        let assigns = transport.wait_assigns(3).await;
        let reassigned: &(String, TaskDescriptor) = assigns.last().unwrap();
        assert_eq!(reassigned.0, "127.0.0.1:9001");
        assert_eq!(reassigned.1.coord, on_doomed);
        assert_eq!(reassigned.1.attempt, 0, "a lost slave must not cost the task an attempt");

        // A late heartbeat from the lost slave tells it to drop everything
        let reply: HeartbeatReply = handle.heartbeat(HeartbeatRequest{ slave: doomed, running: vec![on_doomed] }).await.unwrap();
        assert_eq!(reply.reassign, vec![on_doomed]);

        handle.report_done(done_report(alive, "127.0.0.1:9001", &reassigned.1)).await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), vec![map]);
        beats.abort();
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn stale_input_re_runs_the_producer() {
        let (handle, transport) = start(TimingConfig::default());
        let files: DatasetId = handle.submit(files_spec(&["a.txt"])).await.unwrap();
        let map: DatasetId = handle.submit(map_spec(files, 1)).await.unwrap();
        let reduce: DatasetId = handle.submit(reduce_spec(map, 1)).await.unwrap();

        let slave: SlaveId = handle.register("127.0.0.1:9001".into(), 1).await.unwrap();
        let waiter = tokio::spawn({ let handle = handle.clone(); async move { handle.wait(vec![reduce], None).await } });

        // Map completes, reduce starts
        let assigns = transport.wait_assigns(1).await;
        handle.report_done(done_report(slave, "127.0.0.1:9001", &assigns[0].1)).await.unwrap();
        let assigns = transport.wait_assigns(2).await;
        let reduce_task: TaskDescriptor = assigns[1].1.clone();
        assert_eq!(reduce_task.kind, DatasetKind::Reduce);

        // The reduce finds its input gone; the map must re-run under a new generation
        handle.report_failed(ReportFailedRequest {
            slave,
            coord       : reduce_task.coord,
            attempt     : reduce_task.attempt,
            reason      : "input bucket gone".into(),
            stale_input : Some(BucketAddr::new(map, 0, 0)),
        }).await.unwrap();

        let assigns = transport.wait_assigns(3).await;
        let rerun: &TaskDescriptor = &assigns[2].1;
        assert_eq!(rerun.coord, TaskCoord::new(map, 0));
        assert_eq!(rerun.generation, 1);
        assert_eq!(rerun.attempt, 0, "losing outputs is not the task's fault");

        // Finish the chain: map again, then reduce again (also still attempt 0)
        handle.report_done(done_report(slave, "127.0.0.1:9001", rerun)).await.unwrap();
        let assigns = transport.wait_assigns(4).await;
        assert_eq!(assigns[3].1.coord, TaskCoord::new(reduce, 0));
        assert_eq!(assigns[3].1.attempt, 0);
        handle.report_done(done_report(slave, "127.0.0.1:9001", &assigns[3].1)).await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), vec![reduce]);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn empty_local_source_completes_consumers_without_work() {
        let (handle, transport) = start(TimingConfig::default());
        let local: DatasetId = handle.submit(local_spec(1)).await.unwrap();
        handle.advertise_local(local, vec![]).await.unwrap();
        let map: DatasetId = handle.submit(map_spec(local, 1)).await.unwrap();

        let _slave: SlaveId = handle.register("127.0.0.1:9001".into(), 1).await.unwrap();
        assert_eq!(handle.wait(vec![map], None).await.unwrap(), vec![map]);

        // Nothing was ever offered to the slave, and the output is empty
        assert!(transport.assigns.lock().unwrap().is_empty());
        let outputs = handle.outputs(map).await.unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].is_empty());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_completions_are_discarded() {
        let (handle, transport) = start(TimingConfig::default());
        let files: DatasetId = handle.submit(files_spec(&["a.txt"])).await.unwrap();
        let map: DatasetId = handle.submit(map_spec(files, 1)).await.unwrap();

        let slave: SlaveId = handle.register("127.0.0.1:9001".into(), 1).await.unwrap();
        let _waiter = tokio::spawn({ let handle = handle.clone(); async move { handle.wait(vec![map], None).await } });

        let assigns = transport.wait_assigns(1).await;
        let report: ReportDoneRequest = done_report(slave, "127.0.0.1:9001", &assigns[0].1);
        assert_eq!(handle.report_done(report.clone()).await.unwrap(), ReportDoneReply::Ack);
        assert_eq!(handle.report_done(report).await.unwrap(), ReportDoneReply::Discard);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn closing_consumed_datasets_triggers_gc() {
        let (handle, transport) = start(TimingConfig::default());
        let files: DatasetId = handle.submit(files_spec(&["a.txt"])).await.unwrap();
        let map: DatasetId = handle.submit(map_spec(files, 1)).await.unwrap();

        let slave: SlaveId = handle.register("127.0.0.1:9001".into(), 1).await.unwrap();
        let waiter = tokio::spawn({ let handle = handle.clone(); async move { handle.wait(vec![map], None).await } });
        let assigns = transport.wait_assigns(1).await;
        handle.report_done(done_report(slave, "127.0.0.1:9001", &assigns[0].1)).await.unwrap();
        waiter.await.unwrap().unwrap();

        // Closing the producer alone may not delete anything yet; its consumer is still open
        handle.close(files).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(transport.drops.lock().unwrap().is_empty());

        // Closing the consumer releases the map's buckets
        handle.close(map).await.unwrap();
        for _ in 0..100 {
            if !transport.drops.lock().unwrap().is_empty() { break; }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let drops = transport.drops.lock().unwrap().clone();
        assert!(drops.iter().any(|(_, coord)| *coord == TaskCoord::new(map, 0)));

        // Closing twice is a no-op
        handle.close(map).await.unwrap();
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn closing_local_datasets_drops_the_master_partitions() {
        let (handle, transport) = start(TimingConfig::default());

        // A local source whose single partition the master advertises from its own endpoint
        let local: DatasetId = handle.submit(local_spec(1)).await.unwrap();
        let url: String = BucketAddr::new(local, 0, 0).url_on("127.0.0.1:9990");
        handle.advertise_local(local, vec![url]).await.unwrap();
        let map: DatasetId = handle.submit(map_spec(local, 1)).await.unwrap();

        let slave: SlaveId = handle.register("127.0.0.1:9001".into(), 1).await.unwrap();
        let waiter = tokio::spawn({ let handle = handle.clone(); async move { handle.wait(vec![map], None).await } });
        let assigns = transport.wait_assigns(1).await;
        handle.report_done(done_report(slave, "127.0.0.1:9001", &assigns[0].1)).await.unwrap();
        waiter.await.unwrap().unwrap();

        // Closing the source alone deletes nothing; its consumer is still open
        handle.close(local).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(transport.drops.lock().unwrap().is_empty());

        // Closing the consumer releases both: the master-held partition and the map's buckets
        handle.close(map).await.unwrap();
        for _ in 0..100 {
            if transport.drops.lock().unwrap().len() >= 2 { break; }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let drops = transport.drops.lock().unwrap().clone();
        assert!(drops.iter().any(|(endpoint, coord)| endpoint.as_str() == "127.0.0.1:9990" && *coord == TaskCoord::new(local, 0)),
                "no drop command reached the master's bucket store");
        assert!(drops.iter().any(|(endpoint, coord)| endpoint.as_str() == "127.0.0.1:9001" && *coord == TaskCoord::new(map, 0)));
        handle.shutdown().await;
    }
}
