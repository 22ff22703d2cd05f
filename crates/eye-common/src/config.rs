//! Viewer configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for deployment.
//! Config precedence: env vars > .env file > config.toml > defaults

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global viewer configuration.
///
/// # Panics
/// Panics if config has not been initialized via [`init`].
pub fn get() -> &'static AppConfig {
    CONFIG.get().expect("Config not initialized. Call eye_common::config::init() first.")
}

/// Initialize the global configuration from the environment.
///
/// Should be called once at startup, before anything reads [`get`].
pub fn init() -> Result<&'static AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let app_config = load()?;
    Ok(CONFIG.get_or_init(|| app_config))
}

/// Build a configuration from defaults, `config.toml` and `EYE__*` variables
/// without touching the global slot.
pub fn load() -> Result<AppConfig, config::ConfigError> {
    let cfg = config::Config::builder()
        // Defaults
        .set_default("server.base_url", "http://localhost:8000")?
        .set_default("server.signaling_url", "ws://localhost:8000")?
        .set_default("viewer.local_ip", "0.0.0.0")? // resolved to the default-route interface
        .set_default("viewer.connect_timeout_secs", 0)? // disabled
        .set_default("viewer.media_buffer", 256)?
        .set_default("playback.download_dir", "./recordings")?
        // Optional config file
        .add_source(config::File::with_name("config").required(false))
        // Environment variables (EYE__SERVER__BASE_URL, EYE__VIEWER__LOCAL_IP, etc.)
        .add_source(
            config::Environment::with_prefix("EYE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    cfg.try_deserialize()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub viewer: ViewerConfig,
    pub playback: PlaybackConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// HTTP base of the signaling/catalog service (e.g. "http://localhost:8000").
    pub base_url: String,
    /// WebSocket base for `/ws/view/{id}` and `/ws/dashboard`.
    pub signaling_url: String,
    /// Optional bearer token attached to catalog requests.
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            signaling_url: "ws://localhost:8000".into(),
            token: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ViewerConfig {
    /// Address bound and advertised as the host ICE candidate. The default
    /// `0.0.0.0` resolves to the interface holding the default route, so remote
    /// broadcasters can reach it; set `127.0.0.1` for same-host testing.
    pub local_ip: IpAddr,
    /// Seconds to wait for the first media track; 0 waits indefinitely.
    pub connect_timeout_secs: u64,
    /// Capacity of the inbound media frame broadcast.
    pub media_buffer: usize,
}

impl ViewerConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            local_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            connect_timeout_secs: 0,
            media_buffer: 256,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlaybackConfig {
    /// Directory recordings are downloaded into.
    pub download_dir: String,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            download_dir: "./recordings".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_zero_means_disabled() {
        let mut viewer = ViewerConfig::default();
        assert_eq!(viewer.connect_timeout(), None);

        viewer.connect_timeout_secs = 15;
        assert_eq!(viewer.connect_timeout(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let cfg = load().expect("defaults should deserialize");
        assert!(!cfg.server.base_url.is_empty());
        assert!(cfg.viewer.media_buffer > 0);
        assert!(cfg.viewer.local_ip.is_unspecified());
    }
}
