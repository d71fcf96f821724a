//  NODE.rs
//    by Lut99
//
//  Created:
//    10 Feb 2023, 14:26:40
//  Last edited:
//    14 Jun 2023, 10:40:09
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the per-node configuration: the timing and retry knobs the
//!   scheduler runs with, and where a node keeps its scratch space.
//

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use crate::errors::NodeConfigError as Error;


/***** LIBRARY *****/
/// Defines the timing and retry parameters shared by master and slaves.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    /// The interval, in seconds, at which slaves heartbeat the master.
    pub heartbeat_interval : u64,
    /// How many consecutive heartbeats a slave may miss before it is considered lost.
    pub heartbeat_misses   : u32,
    /// How often a task may fail before the job is aborted.
    pub retry_bound        : u32,
}

impl TimingConfig {
    /// Returns the heartbeat interval as a [`Duration`].
    #[inline]
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    /// Returns the deadline after which a silent slave is marked lost.
    #[inline]
    pub fn lost_after(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval * self.heartbeat_misses as u64)
    }
}

impl Default for TimingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            heartbeat_interval : 5,
            heartbeat_misses   : 3,
            retry_bound        : 3,
        }
    }
}



/// Defines the configuration of one harrow process, master or slave.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// The timing and retry knobs.
    pub timing : TimingConfig,
    /// The root under which this node keeps its job scratch directories. Defaults to the system
    /// temporary directory.
    pub tmpdir : Option<PathBuf>,
    /// How many tasks a slave runs concurrently.
    pub capacity : u32,
}

impl Default for NodeConfig {
    #[inline]
    fn default() -> Self {
        Self {
            timing   : TimingConfig::default(),
            tmpdir   : None,
            capacity : 1,
        }
    }
}

impl NodeConfig {
    /// Constructor for the NodeConfig that reads it from the given path.
    ///
    /// # Arguments
    /// - `path`: The path to read the NodeConfig from.
    ///
    /// # Returns
    /// A new NodeConfig instance with the contents defined in the file.
    ///
    /// # Errors
    /// This function errors if the given file cannot be read or has an invalid format.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path: &Path = path.as_ref();

        // Get the raw file to parse
        let mut raw: String = String::new();
        {
            let mut handle: File = match File::open(path) {
                Ok(handle) => handle,
                Err(err)   => { return Err(Error::FileOpenError{ path: path.into(), err }); },
            };
            if let Err(err) = handle.read_to_string(&mut raw) { return Err(Error::FileReadError{ path: path.into(), err }); }
        }

        // Parse with serde
        match serde_yaml::from_str(&raw) {
            Ok(config) => Ok(config),
            Err(err)   => Err(Error::FileParseError{ path: path.into(), err }),
        }
    }

    /// Writes the NodeConfig to the given path.
    ///
    /// # Errors
    /// This function errors if the given file cannot be written or we failed to serialize ourselves.
    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path: &Path = path.as_ref();

        let config: String = match serde_yaml::to_string(self) {
            Ok(config) => config,
            Err(err)   => { return Err(Error::ConfigSerializeError{ err }); },
        };

        let mut handle: File = match File::create(path) {
            Ok(handle) => handle,
            Err(err)   => { return Err(Error::FileCreateError{ path: path.into(), err }); },
        };
        match handle.write_all(config.as_bytes()) {
            Ok(_)    => Ok(()),
            Err(err) => Err(Error::FileWriteError{ path: path.into(), err }),
        }
    }

    /// Resolves the scratch root: the configured `tmpdir`, or the system temporary directory.
    #[inline]
    pub fn tmpdir(&self) -> PathBuf {
        self.tmpdir.clone().unwrap_or_else(std::env::temp_dir)
    }
}


/***** TESTS *****/
