//! Client configuration
//!
//! Tunables for the protocol core: timeouts, the reliability windows, and
//! queue depths. Values can come from a TOML file, the environment, or be
//! assembled in code; every field has a sensible default matching the
//! reference deployment.

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Environment variable naming an alternate config file
pub const CONFIG_PATH_ENV: &str = "DERETH_NET_CONFIG";

/// Protocol core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client version string sent in the login request
    #[serde(default = "default_client_version")]
    pub client_version: String,

    /// Handshake must complete within this many milliseconds
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Delay before the ConnectResponse goes to the activation endpoint
    #[serde(default = "default_activation_delay_ms")]
    pub activation_delay_ms: u64,

    /// ACK coalescing window in milliseconds; together with the loop tick
    /// this keeps the acknowledgement inside the 200 ms bound
    #[serde(default = "default_ack_window_ms")]
    pub ack_window_ms: u64,

    /// Gap age before a retransmit request goes out
    #[serde(default = "default_retransmit_threshold_ms")]
    pub retransmit_threshold_ms: u64,

    /// Idle interval before a keep-alive is emitted
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// Session teardown after this many seconds without peer traffic
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,

    /// Partial messages are abandoned after this many seconds
    #[serde(default = "default_reassembly_ttl_secs")]
    pub reassembly_ttl_secs: u64,

    /// Cap on simultaneously pending reassemblies
    #[serde(default = "default_max_pending_messages")]
    pub max_pending_messages: usize,

    /// Depth of the outbound command channel
    #[serde(default = "default_queue_depth")]
    pub send_queue_depth: usize,

    /// Depth of the session-event channel
    #[serde(default = "default_queue_depth")]
    pub event_queue_depth: usize,
}

fn default_client_version() -> String {
    "1802".to_string()
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_activation_delay_ms() -> u64 {
    200
}

fn default_ack_window_ms() -> u64 {
    150
}

fn default_retransmit_threshold_ms() -> u64 {
    300
}

fn default_keepalive_interval_ms() -> u64 {
    5_000
}

fn default_inactivity_timeout_secs() -> u64 {
    60
}

fn default_reassembly_ttl_secs() -> u64 {
    30
}

fn default_max_pending_messages() -> usize {
    256
}

fn default_queue_depth() -> usize {
    64
}

impl Default for ClientConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults are total")
    }
}

impl ClientConfig {
    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Load from the path named by `DERETH_NET_CONFIG`, or defaults when the
    /// variable is unset.
    pub fn load() -> anyhow::Result<Self> {
        match env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn activation_delay(&self) -> Duration {
        Duration::from_millis(self.activation_delay_ms)
    }

    pub fn ack_window(&self) -> Duration {
        Duration::from_millis(self.ack_window_ms)
    }

    pub fn retransmit_threshold(&self) -> Duration {
        Duration::from_millis(self.retransmit_threshold_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn reassembly_ttl(&self) -> Duration {
        Duration::from_secs(self.reassembly_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.client_version, "1802");
        assert_eq!(config.activation_delay(), Duration::from_millis(200));
        assert_eq!(config.ack_window(), Duration::from_millis(150));
        assert_eq!(config.retransmit_threshold(), Duration::from_millis(300));
        assert_eq!(config.keepalive_interval(), Duration::from_millis(5_000));
        assert_eq!(config.inactivity_timeout(), Duration::from_secs(60));
        assert_eq!(config.reassembly_ttl(), Duration::from_secs(30));
        assert_eq!(config.max_pending_messages, 256);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: ClientConfig = toml::from_str(
            r#"
            client_version = "1803"
            keepalive_interval_ms = 2500
            "#,
        )
        .unwrap();
        assert_eq!(config.client_version, "1803");
        assert_eq!(config.keepalive_interval(), Duration::from_millis(2_500));
        // Untouched fields keep defaults.
        assert_eq!(config.ack_window_ms, 150);
    }

    #[test]
    fn test_round_trip_serialization() {
        let config = ClientConfig::default();
        let raw = toml::to_string(&config).unwrap();
        let back: ClientConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back.client_version, config.client_version);
        assert_eq!(back.inactivity_timeout_secs, config.inactivity_timeout_secs);
    }
}
