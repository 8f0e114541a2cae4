use crate::{
    catalog::CsvCatalog,
    channel::{ChannelTransport, ConnectionState},
    cycle::{InspectionCycle, SessionView},
    structs::{LiveState, SharedLiveState},
    users::UserDirectory,
};
use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use station_protocol::JudgeResult;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{error, info};

/// Everything the operator console can see or poke.
#[derive(Clone)]
pub struct ControlState {
    pub cycle: InspectionCycle,
    pub live: SharedLiveState,
    pub transport: ChannelTransport,
    pub catalog: Arc<CsvCatalog>,
    pub users: Arc<UserDirectory>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StationSnapshot {
    connection: ConnectionState,
    session: SessionView,
    live: LiveState,
}

#[derive(Serialize)]
struct Reloaded {
    entries: usize,
}

pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/state", get(get_state))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/judge/pass", post(judge_pass))
        .route("/judge/ng", post(judge_ng))
        .route("/catalog/reload", post(reload_catalog))
        .route("/users/reload", post(reload_users))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .with_state(state)
}

pub async fn start_server(port: u16, state: ControlState) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    info!("Control API listening on {addr}");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Control API shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}

async fn get_state(State(state): State<ControlState>) -> Json<StationSnapshot> {
    Json(StationSnapshot {
        connection: state.transport.state(),
        session: state.cycle.view(),
        live: state.live.snapshot().await,
    })
}

async fn start(State(state): State<ControlState>) -> StatusCode {
    state.cycle.start();
    StatusCode::ACCEPTED
}

async fn stop(State(state): State<ControlState>) -> StatusCode {
    state.cycle.stop();
    StatusCode::ACCEPTED
}

async fn judge_pass(State(state): State<ControlState>) -> StatusCode {
    judge(&state, JudgeResult::Pass)
}

async fn judge_ng(State(state): State<ControlState>) -> StatusCode {
    judge(&state, JudgeResult::Ng)
}

/// Refused up front when the button would be disabled on the console.
fn judge(state: &ControlState, result: JudgeResult) -> StatusCode {
    let controls = state.cycle.view().controls;
    let allowed = match result {
        JudgeResult::Pass => controls.pass,
        JudgeResult::Ng => controls.ng,
    };
    if !allowed {
        return StatusCode::CONFLICT;
    }

    state.cycle.judge(result);
    StatusCode::ACCEPTED
}

async fn reload_catalog(
    State(state): State<ControlState>,
) -> Result<Json<Reloaded>, (StatusCode, String)> {
    state
        .catalog
        .reload()
        .map(|entries| Json(Reloaded { entries }))
        .map_err(|e| {
            error!("Catalog reload failed: {e}");
            (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        })
}

async fn reload_users(
    State(state): State<ControlState>,
) -> Result<Json<Reloaded>, (StatusCode, String)> {
    state
        .users
        .reload()
        .map(|entries| Json(Reloaded { entries }))
        .map_err(|e| {
            error!("User directory reload failed: {e}");
            (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        })
}
