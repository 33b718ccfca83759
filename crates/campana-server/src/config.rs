//! Relay configuration loaded from environment variables.
//!
//! All settings have defaults so the relay can start with zero
//! configuration for local development.

use std::net::SocketAddr;

use campana_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_MAX_CALL_MEMBERS};

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Ed25519 public key of the identity service (hex-encoded, 64 chars).
    /// Env: `AUTH_SERVICE_PUBKEY`
    /// Default: all-zeros, which rejects every token (development only).
    pub auth_pubkey: [u8; 32],

    /// Human-readable name for this relay instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Campana Relay"`
    pub instance_name: String,

    /// Maximum number of members in one call channel.
    /// Env: `MAX_CALL_MEMBERS`
    /// Default: `8`
    pub max_call_members: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            auth_pubkey: [0u8; 32],
            instance_name: "Campana Relay".to_string(),
            max_call_members: DEFAULT_MAX_CALL_MEMBERS,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HTTP_ADDR, using default"
                );
            }
        }

        if let Ok(hex_key) = std::env::var("AUTH_SERVICE_PUBKEY") {
            match parse_hex_pubkey(&hex_key) {
                Ok(key) => config.auth_pubkey = key,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid AUTH_SERVICE_PUBKEY, using default (rejects all tokens)"
                    );
                }
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Ok(val) = std::env::var("MAX_CALL_MEMBERS") {
            match val.parse::<usize>() {
                Ok(n) if n >= 2 => config.max_call_members = n,
                _ => {
                    tracing::warn!(value = %val, "Invalid MAX_CALL_MEMBERS, using default");
                }
            }
        }

        config
    }
}

/// Parse a 64-character hex string into a 32-byte key.
fn parse_hex_pubkey(hex_str: &str) -> Result<[u8; 32], String> {
    let hex_str = hex_str.trim();
    if hex_str.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", hex_str.len()));
    }

    let bytes = hex::decode(hex_str).map_err(|e| e.to_string())?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
