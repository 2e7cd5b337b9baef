//! own-redis: an in-memory key-value server over UDP
//!
//! Speaks a small Redis-like text protocol, one request per datagram:
//! - `PING`
//! - `GET <key>`
//! - `SET <key> <value...> [PX <millis>]`
//!
//! Features:
//! - Concurrent key-value storage with per-key millisecond expiration
//! - Lazy expiration on read plus a periodic background sweep
//! - Optional bound on concurrently handled requests
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocol;
mod server;
mod storage;

use config::Config;
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let workers = config.workers.unwrap_or_else(num_cpus).max(1);

    info!(
        host = %config.host,
        port = config.port,
        workers,
        max_in_flight = ?config.max_in_flight,
        cleanup_interval = config.cleanup_interval,
        "Starting own-redis server"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()?;

    runtime.block_on(Server::new(config).run())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
