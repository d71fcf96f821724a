//  TRANSPORT.rs
//    by Lut99
//
//  Created:
//    17 Apr 2023, 10:12:03
//  Last edited:
//    22 Jun 2023, 10:44:38
//  Auto updated?
//    Yes
//
//  Description:
//!   Provides the production implementation of the scheduler's slave
//!   transport: JSON over HTTP with the RPC retry policy. A call only
//!   errors once the policy is exhausted, which the scheduler takes as
//!   "slave lost".
//

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;

use harrow_shr::backoff::{self, BackoffPolicy};
use harrow_tsk::errors::TransportError;
use harrow_tsk::spec::SlaveTransport;
use specifications::tasks::{TaskCoord, TaskDescriptor};
use specifications::working::{AssignReply, AssignRequest, CancelRequest, DropBucketRequest, SlaveStatus};


/***** LIBRARY *****/
/// The JSON-over-HTTP implementation of [`SlaveTransport`].
#[derive(Clone, Debug, Default)]
pub struct HttpSlaveTransport {
    /// The shared HTTP client.
    client : Client,
}

impl HttpSlaveTransport {
    /// Constructor for an HttpSlaveTransport.
    #[inline]
    pub fn new() -> Self {
        Self{ client: Client::new() }
    }

    /// POSTs the given JSON body to the given path on a slave and parses the JSON answer.
    async fn post<B: Serialize, R: DeserializeOwned>(&self, endpoint: &str, what: &'static str, body: &B) -> Result<R, TransportError> {
        let url: String = format!("http://{}/{}", endpoint, what);
        debug!("Calling slave: POST {}", url);

        let target: &str = &url;
        let response: reqwest::Response = match backoff::retry(&format!("POST {}", target), BackoffPolicy::rpc(), || async move {
            self.client.post(target).json(body).send().await
        }).await {
            Ok(response) => response,
            Err(err)     => { return Err(TransportError{ endpoint: endpoint.into(), what, cause: err.to_string() }); },
        };
        if !response.status().is_success() {
            return Err(TransportError{ endpoint: endpoint.into(), what, cause: format!("status {}", response.status()) });
        }
        match response.json().await {
            Ok(parsed) => Ok(parsed),
            Err(err)   => Err(TransportError{ endpoint: endpoint.into(), what, cause: err.to_string() }),
        }
    }
}

#[async_trait]
impl SlaveTransport for HttpSlaveTransport {
    async fn assign(&self, endpoint: &str, task: TaskDescriptor) -> Result<AssignReply, TransportError> {
        self.post(endpoint, "assign", &AssignRequest{ task }).await
    }

    async fn cancel(&self, endpoint: &str, coord: TaskCoord) -> Result<(), TransportError> {
        self.post(endpoint, "cancel", &CancelRequest{ coord }).await
    }

    async fn ping(&self, endpoint: &str) -> Result<SlaveStatus, TransportError> {
        let url: String = format!("http://{}/ping", endpoint);
        let target: &str = &url;
        let response: reqwest::Response = match backoff::retry(&format!("GET {}", target), BackoffPolicy::rpc(), || async move {
            self.client.get(target).send().await
        }).await {
            Ok(response) => response,
            Err(err)     => { return Err(TransportError{ endpoint: endpoint.into(), what: "ping", cause: err.to_string() }); },
        };
        if !response.status().is_success() {
            return Err(TransportError{ endpoint: endpoint.into(), what: "ping", cause: format!("status {}", response.status()) });
        }
        match response.json().await {
            Ok(parsed) => Ok(parsed),
            Err(err)   => Err(TransportError{ endpoint: endpoint.into(), what: "ping", cause: err.to_string() }),
        }
    }

    async fn drop_bucket(&self, endpoint: &str, coord: TaskCoord) -> Result<(), TransportError> {
        self.post(endpoint, "drop", &DropBucketRequest{ coord }).await
    }

    async fn quit(&self, endpoint: &str) -> Result<(), TransportError> {
        self.post(endpoint, "quit", &()).await
    }
}
