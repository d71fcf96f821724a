//  CALLBACK.rs
//    by Lut99
//
//  Created:
//    03 Apr 2023, 11:04:19
//  Last edited:
//    21 Jun 2023, 11:44:37
//  Auto updated?
//    Yes
//
//  Description:
//!   Provides the client with which a slave calls back to its master:
//!   registration, completion/failure reports and heartbeats, all JSON
//!   over HTTP with the RPC retry policy.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};

use log::debug;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;

use harrow_shr::backoff::{self, BackoffPolicy};
use specifications::driving::{HeartbeatReply, HeartbeatRequest, RegisterReply, RegisterRequest, ReportDoneReply, ReportDoneRequest, ReportFailedRequest, SlaveId};
use specifications::tasks::TaskCoord;


/***** ERRORS *****/
/// Defines errors that may occur when calling the master.
#[derive(Debug)]
pub enum CallbackError {
    /// The request failed, even after retries.
    RequestError{ url: String, err: reqwest::Error },
    /// The master answered with a non-success status.
    StatusError{ url: String, code: u16 },
    /// The master's answer was not the expected JSON.
    BodyParseError{ url: String, err: reqwest::Error },
}

impl Display for CallbackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use CallbackError::*;
        match self {
            RequestError{ url, err }   => write!(f, "Failed to call master at '{}': {}", url, err),
            StatusError{ url, code }   => write!(f, "Master at '{}' answered with status {}", url, code),
            BodyParseError{ url, err } => write!(f, "Failed to parse master's answer from '{}': {}", url, err),
        }
    }
}

impl Error for CallbackError {}


/***** LIBRARY *****/
/// The slave's handle on its master.
#[derive(Clone, Debug)]
pub struct MasterClient {
    /// The master's base URL (e.g., `http://host:port`).
    base   : String,
    /// The shared HTTP client.
    client : Client,
}

impl MasterClient {
    /// Constructor for a MasterClient.
    ///
    /// # Arguments
    /// - `master`: The master's address; a missing schema is taken as `http://`.
    pub fn new(master: impl AsRef<str>) -> Self {
        let master: &str = master.as_ref();
        let base: String = if master.starts_with("http://") || master.starts_with("https://") {
            master.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", master.trim_end_matches('/'))
        };
        Self{ base, client: Client::new() }
    }

    /// POSTs the given JSON body to the given path and parses the JSON answer.
    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R, CallbackError> {
        let url: String = format!("{}/{}", self.base, path);
        debug!("Calling master: POST {}", url);

        let target: &str = &url;
        let response: reqwest::Response = match backoff::retry(&format!("POST {}", target), BackoffPolicy::rpc(), || async move {
            self.client.post(target).json(body).send().await
        }).await {
            Ok(response) => response,
            Err(err)     => { return Err(CallbackError::RequestError{ url, err }); },
        };
        if !response.status().is_success() { return Err(CallbackError::StatusError{ url, code: response.status().as_u16() }); }
        match response.json().await {
            Ok(parsed) => Ok(parsed),
            Err(err)   => Err(CallbackError::BodyParseError{ url, err }),
        }
    }

    /// Registers this slave with the master.
    ///
    /// # Returns
    /// The assigned slave identifier and the job this master is running.
    pub async fn register(&self, endpoint: impl Into<String>, capacity: u32) -> Result<RegisterReply, CallbackError> {
        self.post("register", &RegisterRequest{ endpoint: endpoint.into(), capacity }).await
    }

    /// Reports a completed task attempt.
    pub async fn report_done(&self, req: &ReportDoneRequest) -> Result<ReportDoneReply, CallbackError> {
        self.post("report/done", req).await
    }

    /// Reports a failed task attempt.
    pub async fn report_failed(&self, req: &ReportFailedRequest) -> Result<(), CallbackError> {
        self.post("report/failed", req).await
    }

    /// Sends a heartbeat.
    ///
    /// # Returns
    /// The master's reply, possibly telling us to drop tasks we still think we run.
    pub async fn heartbeat(&self, slave: SlaveId, running: Vec<TaskCoord>) -> Result<HeartbeatReply, CallbackError> {
        self.post("heartbeat", &HeartbeatRequest{ slave, running }).await
    }
}
