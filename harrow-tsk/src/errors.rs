//  ERRORS.rs
//    by Lut99
//
//  Created:
//    06 Mar 2023, 09:04:55
//  Last edited:
//    19 Jun 2023, 16:12:28
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the errors that may occur in the `harrow-tsk` crate.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};


/***** LIBRARY *****/
/// Defines errors that occur when calling a slave over the wire.
///
/// The concrete transport lives elsewhere; this type only standardizes what the scheduler needs to
/// know: which endpoint, which call, and a renderable cause. A transport reports an error only
/// after its own retry policy is exhausted, so the scheduler treats these as "slave unreachable".
#[derive(Debug)]
pub struct TransportError {
    /// The endpoint that was called.
    pub endpoint : String,
    /// The call that failed (e.g., `"assign"`).
    pub what     : &'static str,
    /// The rendered underlying cause.
    pub cause    : String,
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        write!(f, "Failed to call {} on '{}': {}", self.what, self.endpoint, self.cause)
    }
}

impl Error for TransportError {}
