use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::Method;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use campana_shared::constants::PROTOCOL_VERSION;

use crate::config::ServerConfig;
use crate::rooms::RoomRegistry;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub registry: RoomRegistry,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Signaling relay listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct InfoResponse {
    instance_name: String,
    version: &'static str,
    protocol: &'static str,
    active_calls: usize,
}

async fn server_info(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<InfoResponse> {
    Json(InfoResponse {
        instance_name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        protocol: PROTOCOL_VERSION,
        active_calls: state.registry.call_count().await,
    })
}
