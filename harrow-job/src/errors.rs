//  ERRORS.rs
//    by Lut99
//
//  Created:
//    03 Apr 2023, 10:26:51
//  Last edited:
//    21 Jun 2023, 11:36:12
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the errors that may occur in the `harrow-job` crate.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::net::SocketAddr;

use specifications::tasks::BucketAddr;


/***** LIBRARY *****/
/// Defines the ways a task attempt can fail on the slave.
///
/// Everything except `StaleInput` counts against the task's retry bound.
#[derive(Debug)]
pub enum ExecuteError {
    /// A function name could not be resolved against the user program's registry.
    UnknownFunction{ what: &'static str, name: String },
    /// An input bucket is gone on its host; the master must re-run the producer.
    StaleInput{ addr: BucketAddr },
    /// An input could not be fetched for transport reasons, even after retries.
    FetchError{ err: harrow_reg::errors::FetchError },
    /// An input record could not be decoded through its serializer.
    SerializeError{ err: specifications::errors::SerializeError },
    /// A bucket could not be written or sealed.
    StoreError{ err: harrow_reg::errors::StoreError },
    /// The master offered a task of a kind that never executes on slaves.
    NotComputable{ kind: specifications::data::DatasetKind },
}

impl Display for ExecuteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use ExecuteError::*;
        match self {
            UnknownFunction{ what, name } => write!(f, "Unknown {} '{}' (is it registered on every process?)", what, name),
            StaleInput{ addr }            => write!(f, "Input {} is no longer available from its producer", addr),
            FetchError{ err }             => write!(f, "Failed to fetch input: {}", err),
            SerializeError{ err }         => write!(f, "Failed to decode input record: {}", err),
            StoreError{ err }             => write!(f, "Failed to write output bucket: {}", err),
            NotComputable{ kind }         => write!(f, "A {} dataset has no slave-side computation", kind),
        }
    }
}

impl Error for ExecuteError {}



/// Defines errors that abort the slave process itself.
#[derive(Debug)]
pub enum WorkerError {
    /// Failed to resolve the address to serve on.
    AddressResolveError{ raw: String, err: std::io::Error },
    /// The address to serve on resolved to nothing.
    MissingAddress{ raw: String },
    /// Failed to register with the master.
    RegisterError{ master: String, err: crate::callback::CallbackError },
    /// Failed to bind the slave's HTTP server.
    BindError{ address: SocketAddr, err: std::io::Error },
    /// The master became unreachable and the heartbeat gave up.
    MasterLost{ master: String, err: crate::callback::CallbackError },
}

impl Display for WorkerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use WorkerError::*;
        match self {
            AddressResolveError{ raw, err } => write!(f, "Failed to resolve '{}' as a socket address: {}", raw, err),
            MissingAddress{ raw }           => write!(f, "Missing socket address in '{}'", raw),
            RegisterError{ master, err }    => write!(f, "Failed to register with master at '{}': {}", master, err),
            BindError{ address, err }       => write!(f, "Failed to bind slave server to '{}': {}", address, err),
            MasterLost{ master, err }       => write!(f, "Lost contact with master at '{}': {}", master, err),
        }
    }
}

impl Error for WorkerError {}
