//! Simulated hardware backend. Serves the station's websocket protocol on
//! `/ws` and exposes a few HTTP knobs to play operator.

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use hil_processor::{HilButton, HilConfig, HilState};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use station_protocol::request::CommandEnvelope;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{error, info};

type SharedHil = Arc<Mutex<HilState>>;

fn hil_log(tag: &str, content: String) {
    match tag {
        "WARN" => tracing::warn!("{content}"),
        "TRACE" => tracing::trace!("{content}"),
        _ => tracing::info!("{content}"),
    }
}

fn lock(hil: &SharedHil) -> MutexGuard<'_, HilState> {
    hil.lock().unwrap_or_else(|p| p.into_inner())
}

#[tokio::main]
async fn main() -> Result<()> {
    _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config_path = std::env::var("HIL_CONFIG").unwrap_or_else(|_| "hil.json".to_string());
    let config: HilConfig = match tokio::fs::read(&config_path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)?,
        Err(_) => {
            info!("{config_path} not found, using defaults");
            HilConfig::default()
        }
    };

    let port: u16 = std::env::var("HIL_PORT")
        .unwrap_or_else(|_| "8765".to_string())
        .parse()?;
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;

    let tick = Duration::from_millis(config.tick_ms.max(1));
    let hil: SharedHil = Arc::new(Mutex::new(HilState::new(config, hil_log)));

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/press/{button}", post(press))
        .route("/tip/{seated}", post(set_tip))
        .route("/short/{asserted}", post(set_short))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .with_state(hil.clone());

    tokio::task::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            lock(&hil).process();
        }
    });

    info!("HIL backend listening on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(hil): State<SharedHil>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        info!("Station connected");
        if let Err(e) = handle_station(socket, hil).await {
            error!("Station socket error: {e}");
        }
        info!("Station disconnected");
    })
}

async fn handle_station(mut socket: WebSocket, hil: SharedHil) -> Result<()> {
    // drop anything queued while nobody was listening
    lock(&hil).take_packets();
    let mut flush = tokio::time::interval(Duration::from_millis(10));

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                match msg? {
                    Message::Text(text) => match serde_json::from_str::<CommandEnvelope>(text.as_str()) {
                        Ok(envelope) => lock(&hil).feed(envelope),
                        Err(e) => error!("Bad command frame {text:?}: {e}"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            _ = flush.tick() => {
                let packets = lock(&hil).take_packets();
                for packet in packets {
                    let json = serde_json::to_string(&packet)?;
                    socket.send(Message::Text(json.into())).await?;
                }
            }
        }
    }

    Ok(())
}

async fn press(Path(button): Path<String>, State(hil): State<SharedHil>) -> StatusCode {
    let button = match button.as_str() {
        "start" => HilButton::Start,
        "pass" => HilButton::Pass,
        "ng" => HilButton::Ng,
        _ => return StatusCode::NOT_FOUND,
    };

    lock(&hil).press(button);
    StatusCode::OK
}

async fn set_tip(Path(seated): Path<bool>, State(hil): State<SharedHil>) -> StatusCode {
    lock(&hil).gpio.needle_tip = seated;
    StatusCode::OK
}

async fn set_short(Path(asserted): Path<bool>, State(hil): State<SharedHil>) -> StatusCode {
    lock(&hil).gpio.short_sense = asserted;
    StatusCode::OK
}
