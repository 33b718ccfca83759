//! # campana-server
//!
//! Signaling relay for Campana calls.
//!
//! This binary provides:
//! - **Per-call signaling channels** over WebSocket: `join-call`,
//!   `leave-call`, and opaque `signal` envelope forwarding between the
//!   members of a call
//! - **Bearer-token authentication** against the external identity
//!   service's Ed25519 public key
//! - **Health/info endpoints** (axum) for deployment probes
//!
//! The relay owns no call business state. Call records live in the call
//! directory service; media flows peer-to-peer.

mod api;
mod auth;
mod config;
mod error;
mod rooms;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::rooms::RoomRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,campana_server=debug")),
        )
        .init();

    info!("Starting Campana signaling relay v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        addr = %config.http_addr,
        max_call_members = config.max_call_members,
        auth_configured = config.auth_pubkey != [0u8; 32],
        "Loaded configuration"
    );

    let http_addr = config.http_addr;
    let state = AppState {
        registry: RoomRegistry::new(config.max_call_members),
        config: Arc::new(config),
    };

    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
