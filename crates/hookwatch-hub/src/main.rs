mod config;
mod logging;
mod relay;
mod routes;
mod state;
mod writer;

use crate::config::load_config;
use crate::logging::{init_logging, LogRing};
use crate::state::HubState;
use crate::writer::spawn_store_writer;
use hookwatch_storage::{LoadOutcome, RecordStore};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing::{error, info, warn};

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let config = load_config();
    let log_ring = LogRing::new(config.log_ring_size);
    let log_guard = init_logging(&config, log_ring.clone());

    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };

    let (store, outcome) = RecordStore::open(&config.data_file, config.capacity);
    match &outcome {
        LoadOutcome::StartedEmpty { reason } => {
            warn!(event = "store_started_empty", path = %config.data_file.display(), reason = %reason)
        }
        LoadOutcome::Loaded { records, dropped } => {
            info!(event = "store_loaded", records = records, dropped = dropped)
        }
        LoadOutcome::NoSnapshot => info!(event = "store_fresh", path = %config.data_file.display()),
    }

    let (store, writer_task) = spawn_store_writer(store);
    let flush_task = store.start_flush_timer(config.flush_interval);
    let hub = Arc::new(HubState::new(config.clone(), store, log_ring));
    let app = routes::router(hub.clone());

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "hub_error", error = %err);
            return;
        }
    };

    info!(
        event = "hub_start",
        addr = %config.addr,
        data_file = %config.data_file.display(),
        relay = config.relay_url.is_some(),
        model_configured = config.model.is_configured()
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(event = "hub_error", error = %err);
    }

    if let Some(task) = flush_task {
        task.abort();
    }
    if let Err(err) = hub.store.flush().await {
        warn!(event = "shutdown_flush_failed", error = %err);
    }
    drop(hub);
    // Open feed sockets may still hold the store handle.
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer_task).await.is_err() {
        warn!(event = "store_writer_drain_timeout");
    }
    info!(event = "hub_stop");
    if let Some(guard) = log_guard {
        guard.flush();
    }
}
