//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tunecast_core::EndOfTrackConfig;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port of the static file server renderers fetch audio from.
    /// Override: `TUNECAST_BIND_PORT`
    pub bind_port: u16,

    /// IP address renderers should use to reach the file server.
    /// If not specified, auto-detection will be attempted.
    /// Override: `TUNECAST_ADVERTISE_IP`
    pub advertise_ip: Option<IpAddr>,

    /// Directory served to renderers; playlist paths are relative to it.
    /// Override: `TUNECAST_MEDIA_ROOT`
    pub media_root: PathBuf,

    /// M3U playlist to play.
    /// Override: `TUNECAST_PLAYLIST`
    pub playlist: Option<PathBuf>,

    /// Base URL renderers fetch songs from instead of the built-in file server.
    pub remote_base_url: Option<String>,

    /// Renderer to drive, matched against friendly name or IP. `local` (or
    /// unset) plays on this machine.
    /// Override: `TUNECAST_RENDERER`
    pub renderer: Option<String>,

    /// Start again from the first song after the last one.
    /// Override: `TUNECAST_REPEAT`
    pub repeat: bool,

    /// Interval in seconds between renderer rescans.
    /// Override: `TUNECAST_RESCAN_INTERVAL`
    pub rescan_interval: u64,

    /// Interval in seconds between network checks.
    pub network_check_interval: u64,

    /// Position polling period while playing, in milliseconds.
    pub position_poll_interval_ms: u64,

    /// Timeout of a single SOAP call, in milliseconds.
    pub soap_timeout_ms: u64,

    /// Remote end-of-track thresholds.
    pub end_of_track: EndOfTrackConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = tunecast_core::Config::default();
        Self {
            bind_port: core.file_server_port,
            advertise_ip: None,
            media_root: PathBuf::from("."),
            playlist: None,
            remote_base_url: None,
            renderer: None,
            repeat: core.repeat,
            rescan_interval: core.rescan_interval_secs,
            network_check_interval: core.network_check_interval_secs,
            position_poll_interval_ms: core.position_poll_interval_ms,
            soap_timeout_ms: core.soap_timeout_ms,
            end_of_track: core.end_of_track,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_yaml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Some(interval) = env_parse("TUNECAST_RESCAN_INTERVAL") {
            self.rescan_interval = interval;
        }

        // Note: the remaining TUNECAST_* variables are handled by clap via
        // #[arg(env = ...)] in main.rs
    }

    /// Whether the configured renderer means this machine.
    pub fn wants_local(&self) -> bool {
        match self.renderer.as_deref() {
            None => true,
            Some(name) => name.eq_ignore_ascii_case("local"),
        }
    }

    /// Converts to tunecast-core's Config type.
    pub fn to_core_config(&self) -> tunecast_core::Config {
        tunecast_core::Config {
            file_server_port: self.bind_port,
            rescan_interval_secs: self.rescan_interval,
            network_check_interval_secs: self.network_check_interval,
            position_poll_interval_ms: self.position_poll_interval_ms,
            soap_timeout_ms: self.soap_timeout_ms,
            repeat: self.repeat,
            end_of_track: self.end_of_track,
            ..Default::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_overrides_defaults() {
        let config = ServerConfig::from_yaml(
            "bind_port: 9000\nrenderer: Den\nrepeat: true\nend_of_track:\n  end_threshold_ms: 300\n  defer_threshold_ms: 1200\n  zero_duration_limit: 5\n",
        )
        .unwrap();

        assert_eq!(config.bind_port, 9000);
        assert_eq!(config.renderer.as_deref(), Some("Den"));
        assert!(!config.wants_local());

        let core = config.to_core_config();
        assert_eq!(core.file_server_port, 9000);
        assert!(core.repeat);
        assert_eq!(core.end_of_track.zero_duration_limit, 5);
        assert_eq!(core.ssdp_send_count, 2);
        assert!(core.validate().is_ok());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = ServerConfig::from_yaml("{}").unwrap();
        assert_eq!(config.bind_port, 8080);
        assert!(config.wants_local());
        assert_eq!(config.to_core_config().rescan_interval_secs, 30);
    }

    #[test]
    fn local_renderer_name_is_case_insensitive() {
        let config = ServerConfig {
            renderer: Some("LOCAL".to_string()),
            ..ServerConfig::default()
        };
        assert!(config.wants_local());
    }
}
