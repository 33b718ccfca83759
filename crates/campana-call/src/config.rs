//! Client configuration loaded from environment variables.
//!
//! ICE servers are deployment configuration, not call logic: a list of
//! STUN URLs and optionally one TURN server with credentials.

#[derive(Debug, Clone)]
pub struct TurnServer {
    pub url: String,
    pub username: String,
    pub credential: String,
}

#[derive(Debug, Clone)]
pub struct IceConfig {
    pub stun_urls: Vec<String>,
    pub turn: Option<TurnServer>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_urls: vec!["stun:stun.l.google.com:19302".to_string()],
            turn: None,
        }
    }
}

impl IceConfig {
    /// Load from `ICE_STUN_URLS` (comma-separated) and
    /// `ICE_TURN_URL` / `ICE_TURN_USERNAME` / `ICE_TURN_CREDENTIAL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(urls) = std::env::var("ICE_STUN_URLS") {
            let parsed = parse_url_list(&urls);
            if parsed.is_empty() {
                tracing::warn!(value = %urls, "Empty ICE_STUN_URLS, using default");
            } else {
                config.stun_urls = parsed;
            }
        }

        if let Ok(url) = std::env::var("ICE_TURN_URL") {
            if !url.trim().is_empty() {
                config.turn = Some(TurnServer {
                    url: url.trim().to_string(),
                    username: std::env::var("ICE_TURN_USERNAME").unwrap_or_default(),
                    credential: std::env::var("ICE_TURN_CREDENTIAL").unwrap_or_default(),
                });
            }
        }

        config
    }
}

/// Client-side endpoints for the relay and the call directory service.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// WebSocket URL of the signaling relay.
    /// Env: `SIGNALING_URL`
    /// Default: `ws://127.0.0.1:8080/ws`
    pub signaling_url: String,

    /// Base URL of the call directory REST service.
    /// Env: `DIRECTORY_URL`
    /// Default: `http://127.0.0.1:8080`
    pub directory_url: String,

    pub ice: IceConfig,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://127.0.0.1:8080/ws".to_string(),
            directory_url: "http://127.0.0.1:8080".to_string(),
            ice: IceConfig::default(),
        }
    }
}

impl CallConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("SIGNALING_URL") {
            config.signaling_url = url;
        }
        if let Ok(url) = std::env::var("DIRECTORY_URL") {
            config.directory_url = url;
        }
        config.ice = IceConfig::from_env();

        config
    }
}

fn parse_url_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
