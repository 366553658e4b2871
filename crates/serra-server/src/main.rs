//! An `HTTP` server which lets operators set the actuators of greenhouse
//! devices and follow their state in real-time.
//!
//! Commands are delivered to devices through an `MQTT` broker, while
//! dashboards receive state transitions and telemetry as `Server-Sent
//! Events`.

mod error;
mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use serra::device::{DEFAULT_DEVICE, DeviceId};

use serra_controller::config::{BusConfig, ReconcileConfig};
use serra_controller::controller::Controller;
use serra_controller::store::{ControlStore, MemoryStore, RedbStore};

use tokio::net::TcpListener;

use tokio_util::sync::CancellationToken;

use tracing::{error, info, warn};

use crate::error::ServerError;
use crate::routes::{AppState, router};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address the server listens on.
    #[arg(long, default_value = "0.0.0.0:5000")]
    address: SocketAddr,

    /// Broker host.
    #[arg(long, default_value = "localhost")]
    broker_host: String,

    /// Broker port.
    #[arg(long, default_value_t = 1883)]
    broker_port: u16,

    /// Client identifier used to connect to the broker.
    #[arg(long, default_value = "serra-server")]
    client_id: String,

    /// Device addressed by requests without a `device` query parameter.
    #[arg(long, default_value = DEFAULT_DEVICE)]
    device: String,

    /// Number of retries of an unacknowledged command.
    #[arg(long, default_value_t = 3)]
    retry_limit: u32,

    /// Milliseconds between two retries of a command.
    #[arg(long, default_value_t = 1500)]
    retry_delay: u64,

    /// Database file of the control records.
    ///
    /// Records are kept in memory when no file is given.
    #[arg(long)]
    database: Option<PathBuf>,
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Impossible to listen for the shutdown signal: {e}");
    }
    info!("Shutting down");
    shutdown.cancel();
}

async fn serve<S: ControlStore>(
    address: SocketAddr,
    device: DeviceId,
    controller: Controller<S>,
) -> Result<(), ServerError> {
    let shutdown = CancellationToken::new();
    let controller = Arc::new(controller);

    let app = router(AppState::new(
        Arc::clone(&controller),
        device,
        shutdown.clone(),
    ));

    let listener = TcpListener::bind(address).await?;
    info!("Listening on http://{address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    match Arc::try_unwrap(controller) {
        Ok(controller) => controller.shutdown().await,
        Err(_) => warn!("Controller still in use, background tasks not awaited"),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();

    let device = DeviceId::new(cli.device.as_str()).ok_or(ServerError::InvalidDevice(cli.device))?;

    let bus = BusConfig::new(cli.client_id, cli.broker_host).port(cli.broker_port);
    let reconcile = ReconcileConfig::new()
        .retry_limit(cli.retry_limit)
        .retry_delay(Duration::from_millis(cli.retry_delay));

    if let Some(path) = cli.database {
        let store = RedbStore::open(&path)?;
        info!("Control records stored in {}", path.display());
        serve(cli.address, device, Controller::start(bus, reconcile, store)?).await
    } else {
        warn!("No database given, control records are kept in memory");
        let store = MemoryStore::new();
        serve(cli.address, device, Controller::start(bus, reconcile, store)?).await
    }
}
