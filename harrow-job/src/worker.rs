//  WORKER.rs
//    by Lut99
//
//  Created:
//    05 Apr 2023, 09:55:40
//  Last edited:
//    21 Jun 2023, 14:02:12
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the slave's lifecycle: bind, register with the master,
//!   serve assignments and buckets, heartbeat until told to quit, then
//!   clean the scratch directory and leave.
//

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use dashmap::DashMap;
use log::{info, warn};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_stream::wrappers::TcpListenerStream;

use harrow_reg::store::BucketStore;
use specifications::driving::RegisterReply;
use specifications::functions::UserProgram;
use specifications::tasks::TaskCoord;

use crate::callback::MasterClient;
use crate::errors::WorkerError;
use crate::executor::TaskRunner;
use crate::server::{self, cancel_local};
use crate::spec::{WorkerOptions, WorkerState};


/***** LIBRARY *****/
/// Runs a slave process to completion.
///
/// The user program must have been constructed with the same arguments as on the master, so the
/// registry resolves the same names.
///
/// # Arguments
/// - `program`: The process-wide user program instance.
/// - `opts`: The [`WorkerOptions`] to run with.
///
/// # Returns
/// Nothing - and by that we mean it typically doesn't really return until the master sends a quit.
///
/// # Errors
/// A [`WorkerError`] if we could not bind, could not register, or lost the master for good.
pub async fn run(program: Arc<dyn UserProgram>, opts: WorkerOptions) -> Result<(), WorkerError> {
    // Bind first, so an ephemeral port is known before we advertise ourselves
    let raw: String = format!("{}:{}", opts.host, opts.port);
    let bind: SocketAddr = match raw.to_socket_addrs() {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr,
            None       => { return Err(WorkerError::MissingAddress{ raw }); },
        },
        Err(err) => { return Err(WorkerError::AddressResolveError{ raw, err }); },
    };
    let listener: TcpListener = match TcpListener::bind(bind).await {
        Ok(listener) => listener,
        Err(err)     => { return Err(WorkerError::BindError{ address: bind, err }); },
    };
    let port: u16 = listener.local_addr().map(|addr| addr.port()).unwrap_or(opts.port);
    let endpoint: String = format!("{}:{}", opts.host, port);

    // Introduce ourselves; the reply tells us which job we serve
    let master: MasterClient = MasterClient::new(&opts.master);
    let reply: RegisterReply = match master.register(endpoint.as_str(), opts.capacity).await {
        Ok(reply) => reply,
        Err(err)  => { return Err(WorkerError::RegisterError{ master: opts.master.clone(), err }); },
    };
    info!("Registered with master at '{}' as {} (job {})", opts.master, reply.slave, reply.job);

    // Now everything else can exist
    let store: Arc<BucketStore> = Arc::new(BucketStore::new(&opts.tmpdir, reply.job));
    let runner: Arc<TaskRunner> = Arc::new(TaskRunner::new(program, store.clone(), &endpoint));
    let state: Arc<WorkerState> = Arc::new(WorkerState {
        slave    : reply.slave,
        capacity : std::cmp::max(opts.capacity, 1),
        endpoint : endpoint.clone(),
        runner,
        store    : store.clone(),
        master   : master.clone(),
        running  : DashMap::new(),
        quit     : Notify::new(),
    });

    // The server future lives in our select below, so the whole slave dies as one unit
    let server = warp::serve(server::routes(state.clone())).run_incoming(TcpListenerStream::new(listener));
    tokio::pin!(server);
    info!("Slave {} serving on '{}'", reply.slave, endpoint);

    // Heartbeat until we are told to quit or the master is gone
    let mut ticker = tokio::time::interval(opts.heartbeat);
    let result: Result<(), WorkerError> = loop {
        tokio::select! {
            _ = &mut server => { break Ok(()); },
            _ = state.quit.notified() => { break Ok(()); },
            _ = ticker.tick() => {
                let running: Vec<TaskCoord> = state.running.iter().map(|entry| *entry.key()).collect();
                match master.heartbeat(state.slave, running).await {
                    Ok(reply) => {
                        for coord in reply.reassign {
                            // The master moved these elsewhere while we were out of touch
                            cancel_local(&state, coord);
                        }
                    },
                    Err(err) => { break Err(WorkerError::MasterLost{ master: opts.master.clone(), err }); },
                }
            },
        }
    };

    // Intermediates never outlive the job on this node
    if let Err(err) = store.clean() {
        warn!("Failed to clean scratch directory '{}': {}", store.root().display(), err);
    }
    info!("Slave {} done", reply.slave);
    result
}
