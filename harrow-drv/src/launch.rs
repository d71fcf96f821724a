//  LAUNCH.rs
//    by Lut99
//
//  Created:
//    18 Apr 2023, 14:40:12
//  Last edited:
//    22 Jun 2023, 14:11:45
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the mode launcher every user program calls from its
//!   `main()`: parse the shared CLI surface, set up logging, construct
//!   the program once for this process and hand off to the master or
//!   slave side.
//

use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use log::{LevelFilter, error};

use harrow_cfg::node::NodeConfig;
use harrow_job::spec::WorkerOptions;
use specifications::functions::UserProgram;

use crate::driver::{self, MasterOptions};
use crate::errors::DriverError;
use crate::spec::{Opts, RunMode};


/***** LIBRARY *****/
/// Launches a harrow user program in the mode the command line asks for.
///
/// The given constructor runs exactly once per process, with the user's own positional arguments,
/// before any task is accepted; master and slaves must construct identically so the function
/// registries agree.
///
/// # Arguments
/// - `program`: Constructs the process-wide user program from the user's positional arguments.
///
/// # Returns
/// The process exit code: 0 on success, 1 on a user-program error, 2 on a scheduler-detected
/// fatal failure.
pub async fn launch<F>(program: F) -> i32
where
    F: FnOnce(&[String]) -> Arc<dyn UserProgram>,
{
    dotenv().ok();
    let opts: Opts = Opts::parse();

    // Configure logger.
    let mut logger = env_logger::builder();
    logger.format_module_path(false);
    if opts.debug {
        logger.filter_level(LevelFilter::Debug).init();
    } else {
        logger.filter_level(LevelFilter::Info).init();
    }

    // Figure out which mode we are
    let mode: RunMode = match RunMode::from_str(&opts.implementation) {
        Ok(mode) => mode,
        Err(err) => { error!("{}", err); return 1; },
    };

    // Load the node config, if one is given
    let config: NodeConfig = match &opts.config {
        Some(path) => match NodeConfig::from_path(path) {
            Ok(config) => config,
            Err(err)   => { error!("{}", err); return 1; },
        },
        None => NodeConfig::default(),
    };
    let tmpdir = opts.tmpdir.clone().unwrap_or_else(|| config.tmpdir());

    // Construct the user program for this process
    let program: Arc<dyn UserProgram> = program(&opts.args);

    match mode {
        RunMode::Master => {
            match driver::run_master(program, MasterOptions {
                host          : opts.host,
                port          : opts.port,
                tmpdir,
                timing        : config.timing,
                timing_slaves : opts.timing_slaves,
            }).await {
                Ok(_) => 0,
                Err(DriverError::UserError{ err }) => { error!("User program failed: {}", err); 1 },
                Err(err) => { error!("{}", err); 2 },
            }
        },

        RunMode::Slave => {
            let master: String = match opts.master {
                Some(master) => master,
                None         => { error!("Slave mode requires --mrs-master"); return 1; },
            };
            match harrow_job::worker::run(program, WorkerOptions {
                master,
                host      : opts.host,
                port      : opts.port,
                tmpdir,
                capacity  : config.capacity,
                heartbeat : config.timing.heartbeat(),
            }).await {
                Ok(_)    => 0,
                Err(err) => { error!("{}", err); 2 },
            }
        },

        RunMode::Serial | RunMode::Bypass => {
            error!("The '{}' implementation is provided by the standalone executor, not by this runtime", mode);
            1
        },
    }
}
