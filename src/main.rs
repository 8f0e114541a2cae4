use anyhow::Result;
use catalog::CsvCatalog;
use channel::{ws::WsConnector, ChannelTransport};
use config::StationConfig;
use cycle::{CycleConfig, CycleDeps, InspectionCycle};
use persistence::{DailySerialStore, FsPersistence};
use snapshot::HttpSnapshotSink;
use std::sync::Arc;
use structs::SharedLiveState;
use tracing::{error, info, warn};
use users::UserDirectory;

mod catalog;
mod channel;
mod config;
mod cycle;
mod eeprom;
mod error;
mod http;
mod log_subscriber;
mod motor;
mod persistence;
mod resistance;
mod snapshot;
mod structs;
mod users;
mod watchers;

#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> Result<()> {
    _ = dotenvy::dotenv();
    let config = StationConfig::from_env()?;
    log_subscriber::MinimalTracer::register(config.logs_dir.clone())?;

    info!(
        "Station starting: {} / {} / {:?}",
        config.part.mtr_version, config.part.country, config.part.needle_label
    );

    let transport = ChannelTransport::new(WsConnector::default());
    let live = SharedLiveState::default();
    transport.connect(&config.backend_url);

    let catalog = Arc::new(CsvCatalog::load(&config.catalog_path).unwrap_or_else(|e| {
        warn!("Catalog not loaded ({e}), tip types will be written as null");
        CsvCatalog::empty(&config.catalog_path)
    }));
    let users = Arc::new(UserDirectory::load(&config.users_path).unwrap_or_else(|e| {
        warn!("User directory not loaded: {e}");
        UserDirectory::empty(&config.users_path)
    }));
    let serials = Arc::new(
        DailySerialStore::open(&config.serial_state_path, persistence::today()).await?,
    );

    let cycle = InspectionCycle::spawn(
        CycleDeps {
            transport: transport.clone(),
            live: live.clone(),
            catalog: catalog.clone(),
            users: users.clone(),
            snapshot: Arc::new(HttpSnapshotSink::new(
                reqwest::Client::new(),
                &config.snapshot_url,
            )),
            persistence: Arc::new(FsPersistence),
            serials,
        },
        CycleConfig::from(&config),
    )
    .await;

    watchers::spawn_event_watcher(&transport, live.clone(), cycle.clone());
    watchers::spawn_link_watcher(&transport, cycle.clone());
    spawn_motor_connect(&config, transport.clone(), live.clone());

    let served = http::start_server(
        config.control_port,
        http::ControlState {
            cycle,
            live,
            transport: transport.clone(),
            catalog,
            users,
        },
    )
    .await;

    transport.disconnect();
    served
}

/// Opens the configured motor serial ports once the backend link is up.
fn spawn_motor_connect(config: &StationConfig, transport: ChannelTransport, live: SharedLiveState) {
    let ports: Vec<_> = [
        (station_protocol::MotorId::Needle, config.needle_port.clone()),
        (station_protocol::MotorId::Probe, config.probe_port.clone()),
    ]
    .into_iter()
    .filter_map(|(motor, port)| port.map(|p| (motor, p)))
    .collect();
    if ports.is_empty() {
        return;
    }

    let baudrate = config.baudrate;
    tokio::task::spawn(async move {
        if let Err(e) = transport.wait_open().await {
            error!("Motors not connected: {e}");
            return;
        }

        let motors = motor::MotorController::new(transport, live);
        for (motor, port) in ports {
            if let Err(e) = motors.connect_motor(motor, &port, baudrate).await {
                error!("{motor} connect on {port} failed: {e}");
            }
        }
    });
}
