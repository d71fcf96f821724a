//  SERVER.rs
//    by Lut99
//
//  Created:
//    04 Apr 2023, 14:05:11
//  Last edited:
//    21 Jun 2023, 13:41:29
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the slave's HTTP server: the management RPC the master
//!   calls (`/assign`, `/cancel`, `/ping`, `/drop`, `/quit`) plus the
//!   bucket routes peers fetch from.
//

use std::sync::Arc;

use log::{debug, error, info, warn};
use warp::{Filter, Rejection, Reply};

use specifications::driving::{ReportDoneReply, ReportDoneRequest, ReportFailedRequest};
use specifications::tasks::{TaskCoord, TaskDescriptor};
use specifications::working::{AssignReply, AssignRequest, CancelRequest, DropBucketRequest, SlaveStatus};

use crate::errors::ExecuteError;
use crate::executor::TaskSuccess;
use crate::spec::{RunningTask, WorkerState};


/***** HELPER FUNCTIONS *****/
/// Awaits a spawned execution, reports its outcome to the master and cleans up after it.
async fn watch(state: Arc<WorkerState>, task: TaskDescriptor, inner: tokio::task::JoinHandle<Result<TaskSuccess, ExecuteError>>) {
    let coord: TaskCoord = task.coord;
    let result = inner.await;
    state.running.remove(&coord);

    match result {
        Ok(Ok(success)) => {
            let report: ReportDoneRequest = ReportDoneRequest {
                slave   : state.slave,
                coord,
                attempt : task.attempt,
                outputs : success.outputs,
                cached  : success.cached,
            };
            match state.master.report_done(&report).await {
                Ok(ReportDoneReply::Ack)     => {},
                Ok(ReportDoneReply::Discard) => {
                    // Somebody else completed this task first; our copy is dead weight
                    debug!("Master discarded our completion of {}; deleting the buckets", coord);
                    if let Err(err) = state.store.delete_task(coord) { warn!("Failed to delete discarded buckets of {}: {}", coord, err); }
                },
                Err(err) => { error!("Failed to report completion of {}: {}", coord, err); },
            }
        },

        Ok(Err(err)) => {
            warn!("{} (attempt {}) failed: {}", coord, task.attempt, err);
            if let Err(derr) = state.store.discard(coord, task.attempt) { warn!("Failed to discard buckets of failed {}: {}", coord, derr); }

            let stale_input = match &err {
                ExecuteError::StaleInput{ addr } => Some(*addr),
                _ => None,
            };
            let report: ReportFailedRequest = ReportFailedRequest {
                slave   : state.slave,
                coord,
                attempt : task.attempt,
                reason  : err.to_string(),
                stale_input,
            };
            if let Err(err) = state.master.report_failed(&report).await { error!("Failed to report failure of {}: {}", coord, err); }
        },

        Err(err) if err.is_cancelled() => {
            // A cancel beat us to it; the canceller already discarded the buckets
            debug!("Execution of {} was cancelled", coord);
        },

        Err(err) => {
            // The user function panicked
            warn!("{} (attempt {}) panicked: {}", coord, task.attempt, err);
            if let Err(derr) = state.store.discard(coord, task.attempt) { warn!("Failed to discard buckets of panicked {}: {}", coord, derr); }
            let report: ReportFailedRequest = ReportFailedRequest {
                slave       : state.slave,
                coord,
                attempt     : task.attempt,
                reason      : format!("user function panicked: {}", err),
                stale_input : None,
            };
            if let Err(err) = state.master.report_failed(&report).await { error!("Failed to report failure of {}: {}", coord, err); }
        },
    }
}


/***** LIBRARY *****/
/// Cancels a locally-running task attempt, discarding its unsealed buckets. A no-op if the task is
/// not running here (cancellation is best-effort by contract).
pub fn cancel_local(state: &WorkerState, coord: TaskCoord) {
    if let Some((_, running)) = state.running.remove(&coord) {
        info!("Cancelling {} (attempt {})", coord, running.attempt);
        running.abort.abort();
        if let Err(err) = state.store.discard(coord, running.attempt) {
            warn!("Failed to discard buckets of cancelled {}: {}", coord, err);
        }
    }
}



/// Handles a POST on `/assign`: takes the task if there is capacity for it.
pub async fn assign(req: AssignRequest, state: Arc<WorkerState>) -> Result<impl Reply, Rejection> {
    if state.running.len() as u32 >= state.capacity {
        debug!("Refusing {}; already running {} task(s)", req.task.coord, state.running.len());
        return Ok(warp::reply::json(&AssignReply::Busy));
    }

    let task: TaskDescriptor = req.task;
    info!("Accepted {} (attempt {})", task.coord, task.attempt);

    let runner = state.runner.clone();
    let inner = tokio::spawn({
        let task: TaskDescriptor = task.clone();
        async move { runner.execute(&task).await }
    });
    state.running.insert(task.coord, RunningTask{ attempt: task.attempt, abort: inner.abort_handle() });
    tokio::spawn(watch(state, task, inner));

    Ok(warp::reply::json(&AssignReply::Accepted))
}

/// Handles a POST on `/cancel`.
pub async fn cancel(req: CancelRequest, state: Arc<WorkerState>) -> Result<impl Reply, Rejection> {
    cancel_local(&state, req.coord);
    Ok(warp::reply::json(&()))
}

/// Handles a GET on `/ping`: answers with the running tasks and the scratch working set.
pub async fn ping(state: Arc<WorkerState>) -> Result<impl Reply, Rejection> {
    let scratch_bytes: u64 = match state.store.usage() {
        Ok(bytes) => bytes,
        Err(err)  => {
            warn!("Failed to measure scratch usage: {}", err);
            0
        },
    };
    let status: SlaveStatus = SlaveStatus {
        running : state.running.iter().map(|entry| *entry.key()).collect(),
        scratch_bytes,
    };
    Ok(warp::reply::json(&status))
}

/// Handles a POST on `/drop`: deletes all buckets of the given task.
pub async fn drop_bucket(req: DropBucketRequest, state: Arc<WorkerState>) -> Result<impl Reply, Rejection> {
    debug!("Dropping buckets of {}", req.coord);
    if let Err(err) = state.store.delete_task(req.coord) {
        warn!("Failed to drop buckets of {}: {}", req.coord, err);
    }
    Ok(warp::reply::json(&()))
}

/// Handles a POST on `/quit`.
pub async fn quit(state: Arc<WorkerState>) -> Result<impl Reply, Rejection> {
    info!("Master told us to quit");
    state.quit.notify_one();
    Ok(warp::reply::json(&()))
}



/// Builds the slave's full route set: management RPC plus bucket serving.
pub fn routes(state: Arc<WorkerState>) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let store = state.store.clone();
    let with_state = {
        let state: Arc<WorkerState> = state;
        warp::any().map(move || state.clone())
    };

    let assign = warp::post()
        .and(warp::path("assign"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(assign);
    let cancel = warp::post()
        .and(warp::path("cancel"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(cancel);
    let ping = warp::get()
        .and(warp::path("ping"))
        .and(warp::path::end())
        .and(with_state.clone())
        .and_then(ping);
    let drop_bucket = warp::post()
        .and(warp::path("drop"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(drop_bucket);
    let quit = warp::post()
        .and(warp::path("quit"))
        .and(warp::path::end())
        .and(with_state)
        .and_then(quit);

    assign.or(cancel).or(ping).or(drop_bucket).or(quit).or(harrow_reg::server::filter(store))
}


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::sync::Arc;

    use async_trait::async_trait;
    use dashmap::DashMap;
    use tokio::sync::Notify;
    use warp::hyper::StatusCode;

    use harrow_reg::store::BucketStore;
    use specifications::data::{DatasetId, JobId};
    use specifications::driving::{JobScope, SlaveId};
    use specifications::functions::{FunctionRegistry, UserProgram};
    use specifications::tasks::BucketAddr;

    use crate::callback::MasterClient;
    use crate::executor::TaskRunner;

    use super::*;

    struct NoProgram {
        registry : FunctionRegistry,
    }
    #[async_trait]
    impl UserProgram for NoProgram {
        fn registry(&self) -> &FunctionRegistry { &self.registry }
        async fn run(&self, _job: &dyn JobScope) -> Result<(), Box<dyn Error + Send + Sync>> { Ok(()) }
    }

    fn state(dir: &std::path::Path, capacity: u32) -> Arc<WorkerState> {
        let store: Arc<BucketStore> = Arc::new(BucketStore::new(dir, JobId::generate()));
        let program: Arc<dyn UserProgram> = Arc::new(NoProgram{ registry: FunctionRegistry::new() });
        Arc::new(WorkerState {
            slave    : SlaveId(0),
            capacity,
            endpoint : "127.0.0.1:7777".into(),
            runner   : Arc::new(TaskRunner::new(program, store.clone(), "127.0.0.1:7777")),
            store,
            master   : MasterClient::new("127.0.0.1:1"),
            running  : DashMap::new(),
            quit     : Notify::new(),
        })
    }

    #[tokio::test]
    async fn assign_refuses_at_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let state: Arc<WorkerState> = state(dir.path(), 1);
        let routes = routes(state.clone());

        // Fake an occupied slot
        let dummy = tokio::spawn(async { std::future::pending::<()>().await });
        state.running.insert(TaskCoord::new(DatasetId(9), 0), RunningTask{ attempt: 0, abort: dummy.abort_handle() });

        let task: TaskDescriptor = TaskDescriptor {
            job              : JobId::generate(),
            coord            : TaskCoord::new(DatasetId(1), 0),
            attempt          : 0,
            generation       : 0,
            kind             : specifications::data::DatasetKind::Map,
            inputs           : vec![],
            out_splits       : 1,
            outdir           : None,
            parter           : "hash".into(),
            mapper           : Some("m".into()),
            reducer          : None,
            combiner         : None,
            key_serializer   : "raw".into(),
            value_serializer : "raw".into(),
        };
        let res = warp::test::request()
            .method("POST")
            .path("/assign")
            .json(&AssignRequest{ task })
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let reply: AssignReply = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(reply, AssignReply::Busy);
        dummy.abort();
    }

    #[tokio::test]
    async fn ping_reports_running_and_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let state: Arc<WorkerState> = state(dir.path(), 2);
        let routes = routes(state.clone());

        let addr: BucketAddr = BucketAddr::new(DatasetId(3), 0, 0);
        state.store.store_fetched(&addr, b"0123456789").unwrap();

        let res = warp::test::request().path("/ping").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::OK);
        let status: SlaveStatus = serde_json::from_slice(res.body()).unwrap();
        assert!(status.running.is_empty());
        assert_eq!(status.scratch_bytes, 10);
    }

    #[tokio::test]
    async fn drop_makes_buckets_gone() {
        let dir = tempfile::tempdir().unwrap();
        let state: Arc<WorkerState> = state(dir.path(), 2);
        let routes = routes(state.clone());

        let addr: BucketAddr = BucketAddr::new(DatasetId(3), 1, 0);
        state.store.store_fetched(&addr, b"x").unwrap();
        let res = warp::test::request().path("/bucket/3/1/0").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = warp::test::request()
            .method("POST")
            .path("/drop")
            .json(&DropBucketRequest{ coord: TaskCoord::new(DatasetId(3), 1) })
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = warp::test::request().path("/bucket/3/1/0").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn quit_raises_the_signal() {
        let dir = tempfile::tempdir().unwrap();
        let state: Arc<WorkerState> = state(dir.path(), 1);
        let routes = routes(state.clone());

        let res = warp::test::request().method("POST").path("/quit").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::OK);

        // The permit is stored, so a later wait sees it
        tokio::time::timeout(std::time::Duration::from_secs(1), state.quit.notified()).await.unwrap();
    }
}
