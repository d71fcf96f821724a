//  SERVER.rs
//    by Lut99
//
//  Created:
//    17 Apr 2023, 11:02:48
//  Last edited:
//    22 Jun 2023, 11:04:15
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the master's HTTP server: the routes slaves call back on
//!   (`/register`, `/report/done`, `/report/failed`, `/heartbeat`) plus
//!   the bucket routes serving the master's locally-partitioned source
//!   data, and the `/drop` route through which the scheduler's garbage
//!   collection releases those partitions again.
//

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, error, warn};
use warp::{Filter, Rejection, Reply};
use warp::hyper::StatusCode;

use harrow_reg::store::BucketStore;
use harrow_tsk::scheduler::SchedulerHandle;
use specifications::data::JobId;
use specifications::driving::{HeartbeatRequest, RegisterReply, RegisterRequest, ReportDoneRequest, ReportFailedRequest};
use specifications::working::DropBucketRequest;


/***** LIBRARY *****/
/// The state shared by the master's HTTP handlers.
pub struct MasterState {
    /// The job this master runs.
    pub job         : JobId,
    /// The handle into the scheduler loop.
    pub scheduler   : SchedulerHandle,
    /// The master's own bucket store (local source partitions live here).
    pub store       : Arc<BucketStore>,
    /// How many slaves have registered so far (the `--mrs-timing-slaves` gate watches this).
    pub slaves_seen : AtomicU32,
}



/// Handles a POST on `/register`.
pub async fn register(req: RegisterRequest, state: Arc<MasterState>) -> Result<impl Reply, Rejection> {
    match state.scheduler.register(req.endpoint, req.capacity).await {
        Ok(slave) => {
            state.slaves_seen.fetch_add(1, Ordering::SeqCst);
            Ok(warp::reply::with_status(warp::reply::json(&RegisterReply{ slave, job: state.job }), StatusCode::OK))
        },
        Err(err) => {
            error!("Failed to register slave: {}", err);
            Ok(warp::reply::with_status(warp::reply::json(&()), StatusCode::INTERNAL_SERVER_ERROR))
        },
    }
}

/// Handles a POST on `/report/done`.
pub async fn report_done(req: ReportDoneRequest, state: Arc<MasterState>) -> Result<impl Reply, Rejection> {
    match state.scheduler.report_done(req).await {
        Ok(reply) => Ok(warp::reply::with_status(warp::reply::json(&reply), StatusCode::OK)),
        Err(err)  => {
            error!("Failed to process completion report: {}", err);
            Ok(warp::reply::with_status(warp::reply::json(&()), StatusCode::INTERNAL_SERVER_ERROR))
        },
    }
}

/// Handles a POST on `/report/failed`.
pub async fn report_failed(req: ReportFailedRequest, state: Arc<MasterState>) -> Result<impl Reply, Rejection> {
    match state.scheduler.report_failed(req).await {
        Ok(_)    => Ok(warp::reply::with_status(warp::reply::json(&()), StatusCode::OK)),
        Err(err) => {
            error!("Failed to process failure report: {}", err);
            Ok(warp::reply::with_status(warp::reply::json(&()), StatusCode::INTERNAL_SERVER_ERROR))
        },
    }
}

/// Handles a POST on `/heartbeat`.
pub async fn heartbeat(req: HeartbeatRequest, state: Arc<MasterState>) -> Result<impl Reply, Rejection> {
    match state.scheduler.heartbeat(req).await {
        Ok(reply) => Ok(warp::reply::with_status(warp::reply::json(&reply), StatusCode::OK)),
        Err(err)  => {
            error!("Failed to process heartbeat: {}", err);
            Ok(warp::reply::with_status(warp::reply::json(&()), StatusCode::INTERNAL_SERVER_ERROR))
        },
    }
}

/// Handles a POST on `/drop`: deletes master-held buckets (local source partitions) of the given
/// task. The scheduler sends this when a closed local dataset has no open dependents left.
pub async fn drop_bucket(req: DropBucketRequest, state: Arc<MasterState>) -> Result<impl Reply, Rejection> {
    debug!("Dropping master-held buckets of {}", req.coord);
    if let Err(err) = state.store.delete_task(req.coord) {
        warn!("Failed to drop master-held buckets of {}: {}", req.coord, err);
    }
    Ok(warp::reply::with_status(warp::reply::json(&()), StatusCode::OK))
}



/// Builds the master's full route set: the slave callbacks plus bucket serving.
pub fn routes(state: Arc<MasterState>) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let store = state.store.clone();
    let with_state = {
        let state: Arc<MasterState> = state;
        warp::any().map(move || state.clone())
    };

    let register = warp::post()
        .and(warp::path("register"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(register);
    let report_done = warp::post()
        .and(warp::path("report"))
        .and(warp::path("done"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(report_done);
    let report_failed = warp::post()
        .and(warp::path("report"))
        .and(warp::path("failed"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(report_failed);
    let heartbeat = warp::post()
        .and(warp::path("heartbeat"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(heartbeat);
    let drop_bucket = warp::post()
        .and(warp::path("drop"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with_state)
        .and_then(drop_bucket);

    register.or(report_done).or(report_failed).or(heartbeat).or(drop_bucket).or(harrow_reg::server::filter(store))
}
