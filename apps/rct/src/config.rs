use std::env;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5800;

/// Tunables for both sides of the link. Hard defaults with `RCT_*`
/// environment overrides.
#[derive(Debug, Clone)]
pub struct Config {
    /// How long `check_server_connection` waits for a connection-response.
    pub response_timeout: Duration,
    /// Fixed period of the local health/reconnect loop.
    pub poll_interval: Duration,
    /// How often each side sends its keepalive ping.
    pub keepalive_send_interval: Duration,
    /// Sliding window after which a silent peer process is considered dead.
    pub keepalive_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            response_timeout: millis_var("RCT_RESPONSE_TIMEOUT_MS", 2_000),
            poll_interval: millis_var("RCT_POLL_INTERVAL_MS", 2_000),
            keepalive_send_interval: millis_var("RCT_KEEPALIVE_SEND_MS", 500),
            keepalive_timeout: millis_var("RCT_KEEPALIVE_TIMEOUT_MS", 2_000),
        }
    }

    pub fn keepalive(&self) -> crate::keepalive::KeepaliveConfig {
        crate::keepalive::KeepaliveConfig {
            send_interval: self.keepalive_send_interval,
            timeout: self.keepalive_timeout,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(2_000),
            poll_interval: Duration::from_millis(2_000),
            keepalive_send_interval: Duration::from_millis(500),
            keepalive_timeout: Duration::from_millis(2_000),
        }
    }
}

fn millis_var(var: &str, default_ms: u64) -> Duration {
    let millis = env::var(var)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default_ms);
    Duration::from_millis(millis)
}
