//  ERRORS.rs
//    by Lut99
//
//  Created:
//    10 Feb 2023, 14:04:17
//  Last edited:
//    30 May 2023, 13:51:02
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the errors that may occur in the `harrow-cfg` crate.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;


/***** LIBRARY *****/
/// Defines errors that relate to the NodeConfig.
#[derive(Debug)]
pub enum NodeConfigError {
    /// Failed to open the config file.
    FileOpenError{ path: PathBuf, err: std::io::Error },
    /// Failed to read the config file.
    FileReadError{ path: PathBuf, err: std::io::Error },
    /// Failed to parse the config file.
    FileParseError{ path: PathBuf, err: serde_yaml::Error },

    /// Failed to serialize the config.
    ConfigSerializeError{ err: serde_yaml::Error },
    /// Failed to create the target file.
    FileCreateError{ path: PathBuf, err: std::io::Error },
    /// Failed to write to the target file.
    FileWriteError{ path: PathBuf, err: std::io::Error },
}

impl Display for NodeConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use NodeConfigError::*;
        match self {
            FileOpenError{ path, err }  => write!(f, "Failed to open node config file '{}': {}", path.display(), err),
            FileReadError{ path, err }  => write!(f, "Failed to read node config file '{}': {}", path.display(), err),
            FileParseError{ path, err } => write!(f, "Failed to parse node config file '{}' as YAML: {}", path.display(), err),

            ConfigSerializeError{ err } => write!(f, "Failed to serialize node config: {}", err),
            FileCreateError{ path, err } => write!(f, "Failed to create node config file '{}': {}", path.display(), err),
            FileWriteError{ path, err }  => write!(f, "Failed to write node config file '{}': {}", path.display(), err),
        }
    }
}

impl Error for NodeConfigError {}
