//  SPEC.rs
//    by Lut99
//
//  Created:
//    17 Apr 2023, 09:44:50
//  Last edited:
//    22 Jun 2023, 10:31:27
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines (public) interfaces and structs for the `harrow-drv` crate:
//!   the execution modes and the command-line options every harrow user
//!   program recognizes.
//

use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;


/***** LIBRARY *****/
/// The execution modes a user-program binary can be launched in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunMode {
    /// Run the job driver, the scheduler and the master server.
    Master,
    /// Run a slave that registers with an existing master.
    Slave,
    /// Single-process serial execution (provided by the separate standalone executor).
    Serial,
    /// Single-process bypass execution (provided by the separate standalone executor).
    Bypass,
}

impl Display for RunMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use RunMode::*;
        match self {
            Master => write!(f, "master"),
            Slave  => write!(f, "slave"),
            Serial => write!(f, "serial"),
            Bypass => write!(f, "bypass"),
        }
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "master" => Ok(Self::Master),
            "slave"  => Ok(Self::Slave),
            "serial" => Ok(Self::Serial),
            "bypass" => Ok(Self::Bypass),

            raw => Err(format!("Unknown execution mode '{}' (expected 'master', 'slave', 'serial' or 'bypass')", raw)),
        }
    }
}



/// Defines the command-line options recognized by every harrow user program.
///
/// User-defined positionals pass through untouched in `args`; the program's constructor receives
/// them on every process.
#[derive(Debug, Parser)]
#[clap(version = env!("CARGO_PKG_VERSION"))]
pub struct Opts {
    /// Print debug info
    #[clap(long, action, env = "DEBUG", help = "If given, provides additional debug prints on the logger.")]
    pub debug : bool,

    /// The execution mode.
    #[clap(long = "mrs", default_value = "master", help = "The execution implementation: 'master', 'slave', 'serial' or 'bypass'.", env = "MRS_IMPLEMENTATION")]
    pub implementation : String,
    /// The master to register with (slave mode only).
    #[clap(long = "mrs-master", help = "The master's address ('host:port' or an http URL). Required in slave mode.", env = "MRS_MASTER")]
    pub master         : Option<String>,
    /// The hostname under which this process advertises itself.
    #[clap(long = "mrs-host", default_value = "127.0.0.1", help = "The hostname under which this process is reachable by its peers.", env = "MRS_HOST")]
    pub host           : String,
    /// The port to serve on.
    #[clap(long = "mrs-port", default_value = "0", help = "The port to serve RPC and buckets on; 0 picks a free one.", env = "MRS_PORT")]
    pub port           : u16,
    /// The scratch root.
    #[clap(long = "mrs-tmpdir", help = "The directory under which this process keeps its job scratch space. Defaults to the system temporary directory.", env = "MRS_TMPDIR")]
    pub tmpdir         : Option<PathBuf>,
    /// How many slaves to wait for before dispatching (master mode only).
    #[clap(long = "mrs-timing-slaves", default_value = "0", help = "If nonzero, the master waits for this many slave registrations before the run-method starts.", env = "MRS_TIMING_SLAVES")]
    pub timing_slaves  : u32,
    /// An optional node configuration file with the timing and retry knobs.
    #[clap(long = "mrs-config", help = "The path to a node configuration file (YAML) overriding the default timing and retry knobs.", env = "MRS_CONFIG")]
    pub config         : Option<PathBuf>,

    /// The user program's own arguments.
    #[clap(help = "Arguments for the user program itself; harrow passes them through untouched.")]
    pub args : Vec<String>,
}


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runmode_parses() {
        assert_eq!(RunMode::from_str("master").unwrap(), RunMode::Master);
        assert_eq!(RunMode::from_str("slave").unwrap(), RunMode::Slave);
        assert!(RunMode::from_str("cluster").is_err());
    }

    #[test]
    fn opts_parse_compat_flags() {
        let opts: Opts = Opts::parse_from([
            "wordcount",
            "--mrs", "slave",
            "--mrs-master", "10.0.0.1:5000",
            "--mrs-port", "5001",
            "--mrs-tmpdir", "/tmp/harrow",
            "--mrs-timing-slaves", "2",
            "in.txt", "out.txt",
        ]);
        assert_eq!(opts.implementation, "slave");
        assert_eq!(opts.master.as_deref(), Some("10.0.0.1:5000"));
        assert_eq!(opts.port, 5001);
        assert_eq!(opts.tmpdir, Some(PathBuf::from("/tmp/harrow")));
        assert_eq!(opts.timing_slaves, 2);
        assert_eq!(opts.args, vec!["in.txt".to_string(), "out.txt".to_string()]);
    }
}
