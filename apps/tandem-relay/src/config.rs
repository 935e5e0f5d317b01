use std::env;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    /// Participants silent for longer than this are dropped from their session.
    pub heartbeat_timeout: Duration,
    pub monitor_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            heartbeat_timeout: Duration::from_secs(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
            monitor_interval: Duration::from_secs(DEFAULT_MONITOR_INTERVAL_SECS),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, fallback: Duration| {
            lookup(key)
                .and_then(|value| value.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };

        Self {
            bind: lookup("TANDEM_RELAY_BIND")
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.bind),
            port: lookup("TANDEM_RELAY_PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(defaults.port),
            heartbeat_timeout: secs("TANDEM_RELAY_HEARTBEAT_TIMEOUT", defaults.heartbeat_timeout),
            monitor_interval: secs("TANDEM_RELAY_MONITOR_INTERVAL", defaults.monitor_interval),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
