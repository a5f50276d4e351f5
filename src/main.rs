//! `pool-sentinel` binary entrypoint (spec §6, §7): loads configuration from
//! the environment, builds a `PoolMonitor`, and runs it until `ctrl-c` or a
//! fatal error. A missing required env var is a fatal-config error — the
//! cause is logged and the process exits non-zero before the event loop
//! starts (spec §7).

use pool_sentinel::{Config, PoolMonitor};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // yellowstone-grpc-client negotiates TLS through tonic+rustls; a process
    // using rustls 0.23 directly must install a crypto provider once before
    // the first connection attempt.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "fatal configuration error, exiting");
            std::process::exit(1);
        }
    };

    info!(
        endpoint = %config.stream_endpoint,
        enabled_dexs = ?config.enabled_dexs,
        "starting pool-sentinel"
    );

    let monitor = match PoolMonitor::new(config) {
        Ok(monitor) => Arc::new(monitor),
        Err(e) => {
            error!(error = %e, "failed to initialize pool monitor, exiting");
            std::process::exit(1);
        }
    };

    let shutdown_monitor = Arc::clone(&monitor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, shutting down");
            shutdown_monitor.stop();
        }
    });

    monitor.run().await;
    info!("pool-sentinel stopped");
}
