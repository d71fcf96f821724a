//  ERRORS.rs
//    by Lut99
//
//  Created:
//    17 Apr 2023, 09:36:14
//  Last edited:
//    22 Jun 2023, 10:20:09
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the errors that may occur in the `harrow-drv` crate.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};


/***** LIBRARY *****/
/// Defines the ways a master run can end badly.
///
/// The launcher maps these onto the process exit codes: user-program errors exit 1, everything the
/// scheduler detected fatally exits 2.
#[derive(Debug)]
pub enum DriverError {
    /// Failed to resolve the address to serve on.
    AddressResolveError{ raw: String, err: std::io::Error },
    /// The address to serve on resolved to nothing.
    MissingAddress{ raw: String },
    /// Failed to bind the master's HTTP server.
    BindError{ raw: String, err: std::io::Error },
    /// The user program's run-method returned an error.
    UserError{ err: Box<dyn Error + Send + Sync> },
    /// The scheduler aborted the job (retry bound exhausted or an unrecoverable failure).
    Fatal{ reason: String },
}

impl Display for DriverError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use DriverError::*;
        match self {
            AddressResolveError{ raw, err } => write!(f, "Failed to resolve '{}' as a socket address: {}", raw, err),
            MissingAddress{ raw }           => write!(f, "Missing socket address in '{}'", raw),
            BindError{ raw, err }           => write!(f, "Failed to bind master server to '{}': {}", raw, err),
            UserError{ err }                => write!(f, "User program failed: {}", err),
            Fatal{ reason }                 => write!(f, "{}", reason),
        }
    }
}

impl Error for DriverError {}
