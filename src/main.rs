use std::process::ExitCode;
use std::sync::Arc;

use config_file::{PodiumConfigFile, StoreKind};
use health::{HealthChecker, HealthMonitor};
use runtime::docker::DockerRuntime;
use service::{Reconciler, ServiceManager};
use store::{FileStore, MemoryStore, Records, Store};

mod api;
mod background;
mod cli;
mod config_file;
mod error;
mod health;
mod models;
mod runtime;
mod service;
mod signals;
mod store;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize the logger
    env_logger::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = PodiumConfigFile::try_init()
        .await
        .map_err(|e| format!("Unable to read config: {e}"))?;

    let runtime = Arc::new(
        DockerRuntime::connect()
            .await
            .map_err(|e| format!("Unable to connect to the container engine: {e}"))?,
    );

    let store: Arc<dyn Store> = match config.store {
        StoreKind::File => Arc::new(
            FileStore::open(&config.data_dir)
                .await
                .map_err(|e| format!("Unable to open store at {:?}: {e}", config.data_dir))?,
        ),
        StoreKind::Memory => {
            log::warn!("Using the in-memory store; records are lost on exit");
            Arc::new(MemoryStore::new())
        }
    };
    let records = Records::new(store);

    let manager = Arc::new(ServiceManager::new(
        runtime.clone(),
        records.clone(),
        config.health.max_restarts,
    ));

    let monitor = Arc::new(HealthMonitor::new(
        runtime,
        records,
        Arc::new(HealthChecker::new(config.health.probe_host.clone())),
        config.monitor_config(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        manager.clone(),
        config.reconcile_interval(),
    ));

    let shutdown = signals::handle_shutdown()?;
    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .map_err(|e| format!("Unable to bind {}: {e}", config.listen))?;

    let monitor_loop = monitor.spawn();
    let reconcile_loop = reconciler.clone().spawn();

    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);

    let served = api::serve(
        listener,
        api::AppState {
            manager,
            reconciler,
        },
        shutdown,
    )
    .await;

    // Let in-flight ticks finish before the process exits.
    monitor_loop.stop().await;
    reconcile_loop.stop().await;
    log::info!("Shutdown complete");

    served.map_err(Into::into)
}
