//! Core configuration types.
//!
//! [`Config`] holds every tunable value of the core. The daemon loads its own
//! YAML configuration and converts it into this type.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning values for the remote end-of-track heuristic.
///
/// Renderers report position with second precision and the reported duration
/// drops to zero for a moment after a new URI is accepted. These values were
/// tuned against real renderers and are kept as-is.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct EndOfTrackConfig {
    /// Remaining time below which the track is considered finished now.
    pub end_threshold_ms: u64,

    /// Remaining time below which the decision is deferred by one tick.
    pub defer_threshold_ms: u64,

    /// Number of consecutive zero-duration samples tolerated before the track
    /// is considered finished.
    pub zero_duration_limit: u32,
}

impl EndOfTrackConfig {
    /// Validates the thresholds.
    pub fn validate(&self) -> Result<(), String> {
        if self.end_threshold_ms == 0 {
            return Err("end_threshold_ms must be >= 1".to_string());
        }
        if self.defer_threshold_ms < self.end_threshold_ms {
            return Err("defer_threshold_ms must be >= end_threshold_ms".to_string());
        }
        Ok(())
    }
}

impl Default for EndOfTrackConfig {
    fn default() -> Self {
        Self {
            end_threshold_ms: 250,
            defer_threshold_ms: 1050,
            zero_duration_limit: 3,
        }
    }
}

/// Configuration for the Tunecast core.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // File server
    /// Port for the static file server renderers pull audio from (0 = auto-assign).
    pub file_server_port: u16,

    // Discovery
    /// Interval between periodic renderer scans while the network is up (seconds).
    pub rescan_interval_secs: u64,

    /// Interval between network availability checks (seconds).
    pub network_check_interval_secs: u64,

    /// Number of M-SEARCH packets sent per discovery pass.
    pub ssdp_send_count: u32,

    /// Per-receive timeout that ends a discovery pass (milliseconds).
    pub ssdp_receive_timeout_ms: u64,

    /// MX value (max response delay in seconds) advertised in M-SEARCH.
    pub ssdp_mx: u64,

    /// Timeout for a device description fetch (milliseconds).
    pub probe_timeout_ms: u64,

    // Control
    /// Timeout for a single SOAP call (milliseconds). Expiry counts as failure.
    pub soap_timeout_ms: u64,

    /// Period of the position-report timer while playing (milliseconds).
    pub position_poll_interval_ms: u64,

    /// Wrap to the first song after the last one finishes.
    pub repeat: bool,

    /// Remote end-of-track heuristic thresholds.
    pub end_of_track: EndOfTrackConfig,
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.ssdp_send_count == 0 {
            return Err("ssdp_send_count must be >= 1".to_string());
        }
        if self.ssdp_receive_timeout_ms == 0 {
            return Err("ssdp_receive_timeout_ms must be >= 1".to_string());
        }
        if self.rescan_interval_secs == 0 {
            return Err("rescan_interval_secs must be >= 1".to_string());
        }
        if self.position_poll_interval_ms == 0 {
            return Err("position_poll_interval_ms must be >= 1".to_string());
        }
        if self.soap_timeout_ms == 0 {
            return Err("soap_timeout_ms must be >= 1".to_string());
        }
        self.end_of_track.validate()
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_secs)
    }

    pub fn network_check_interval(&self) -> Duration {
        Duration::from_secs(self.network_check_interval_secs.max(1))
    }

    pub fn ssdp_receive_timeout(&self) -> Duration {
        Duration::from_millis(self.ssdp_receive_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn soap_timeout(&self) -> Duration {
        Duration::from_millis(self.soap_timeout_ms)
    }

    pub fn position_poll_interval(&self) -> Duration {
        Duration::from_millis(self.position_poll_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            file_server_port: 8080,
            rescan_interval_secs: 30,
            network_check_interval_secs: 5,
            ssdp_send_count: 2,
            ssdp_receive_timeout_ms: 2000,
            ssdp_mx: 3,
            probe_timeout_ms: 5000,
            soap_timeout_ms: 5000,
            position_poll_interval_ms: 1000,
            repeat: false,
            end_of_track: EndOfTrackConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.file_server_port, 8080);
        assert_eq!(config.ssdp_send_count, 2);
        assert_eq!(config.rescan_interval(), Duration::from_secs(30));
    }

    #[test]
    fn config_rejects_zero_values() {
        let config = Config {
            ssdp_send_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            position_poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn end_of_track_defaults_match_tuned_values() {
        let eot = EndOfTrackConfig::default();
        assert_eq!(eot.end_threshold_ms, 250);
        assert_eq!(eot.defer_threshold_ms, 1050);
        assert_eq!(eot.zero_duration_limit, 3);
    }

    #[test]
    fn end_of_track_rejects_inverted_thresholds() {
        let eot = EndOfTrackConfig {
            end_threshold_ms: 2000,
            defer_threshold_ms: 1000,
            zero_duration_limit: 3,
        };
        assert!(eot.validate().is_err());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"repeat": true}"#).unwrap();
        assert!(config.repeat);
        assert_eq!(config.soap_timeout_ms, 5000);
    }
}
