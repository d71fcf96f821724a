//  SERVER.rs
//    by Lut99
//
//  Created:
//    21 Feb 2023, 11:08:26
//  Last edited:
//    19 Jun 2023, 15:40:12
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the HTTP side of the bucket registry: the warp filter
//!   with which a process serves its sealed buckets to peers.
//!
//!   The status codes are part of the protocol: 404 means the bucket is
//!   unknown here, 410 means it existed but was deleted on master
//!   command. A consumer treats both as "the producer must re-run".
//

use std::sync::Arc;

use log::{debug, error};
use warp::Filter;
use warp::http::HeaderValue;
use warp::http::header::CONTENT_TYPE;
use warp::hyper::{Body, StatusCode};
use warp::reply::Response;

use specifications::data::DatasetId;
use specifications::tasks::BucketAddr;

use crate::errors::ReadError;
use crate::store::BucketStore;


/***** HELPER FUNCTIONS *****/
/// Builds an empty response with the given status code.
fn status_response(status: StatusCode) -> Response {
    let mut response: Response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}


/***** LIBRARY *****/
/// Handles a GET on `/bucket/{dataset}/{source}/{split}`.
///
/// # Arguments
/// - `dataset` / `source` / `split`: The address of the requested bucket.
/// - `store`: The [`BucketStore`] to serve from.
///
/// # Returns
/// The framed record stream as `application/octet-stream`, or one of the protocol status codes.
/// Never rejects; protocol problems are expressed as status codes instead.
pub async fn get(dataset: u64, source: u32, split: u32, store: Arc<BucketStore>) -> Result<Response, warp::Rejection> {
    let addr: BucketAddr = BucketAddr::new(DatasetId(dataset), source, split);
    debug!("Handling GET on `/{}`...", addr.url_path());

    match store.read(&addr) {
        Ok(raw) => {
            let mut response: Response = Response::new(Body::from(raw));
            response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
            Ok(response)
        },
        Err(ReadError::NotFound{ .. }) => Ok(status_response(StatusCode::NOT_FOUND)),
        Err(ReadError::Gone{ .. })     => Ok(status_response(StatusCode::GONE)),
        Err(err) => {
            error!("Failed to serve {}: {}", addr, err);
            Ok(status_response(StatusCode::INTERNAL_SERVER_ERROR))
        },
    }
}

/// Returns the warp filter serving the given store's buckets.
pub fn filter(store: Arc<BucketStore>) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    let store = warp::any().map(move || store.clone());
    warp::get()
        .and(warp::path("bucket"))
        .and(warp::path::param::<u64>())
        .and(warp::path::param::<u32>())
        .and(warp::path::param::<u32>())
        .and(warp::path::end())
        .and(store)
        .and_then(get)
}


/***** TESTS *****/
