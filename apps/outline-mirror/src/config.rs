use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::channel::ReconnectPolicy;

pub const ENV_CHANNEL_NAME: &str = "OUTLINE_CHANNEL_NAME";
pub const ENV_RECONNECT_BASE_MS: &str = "OUTLINE_RECONNECT_BASE_MS";
pub const ENV_RECONNECT_MAX_MS: &str = "OUTLINE_RECONNECT_MAX_MS";
pub const ENV_RECONNECT_ATTEMPTS: &str = "OUTLINE_RECONNECT_ATTEMPTS";
pub const ENV_QUEUE_SIZE: &str = "OUTLINE_QUEUE_SIZE";
pub const ENV_HEARTBEAT_MS: &str = "OUTLINE_HEARTBEAT_MS";

/// Channel configuration. Every field is defaulted, so partial JSON
/// documents and empty environments are both valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    /// Port name passed to the transport's connect-by-name.
    pub name: String,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub max_queue_size: usize,
    /// Absent or `<= 0` disables the heartbeat.
    pub heartbeat_interval_ms: Option<i64>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: "tree-view".to_string(),
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 10,
            max_queue_size: 100,
            heartbeat_interval_ms: None,
        }
    }
}

impl ConnectionConfig {
    /// Defaults overridden by any `OUTLINE_*` variables that parse.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(name) = env::var(ENV_CHANNEL_NAME) {
            if !name.trim().is_empty() {
                config.name = name.trim().to_string();
            }
        }
        override_from_env(ENV_RECONNECT_BASE_MS, &mut config.reconnect_base_delay_ms);
        override_from_env(ENV_RECONNECT_MAX_MS, &mut config.reconnect_max_delay_ms);
        override_from_env(ENV_RECONNECT_ATTEMPTS, &mut config.max_reconnect_attempts);
        override_from_env(ENV_QUEUE_SIZE, &mut config.max_queue_size);
        let mut heartbeat = config.heartbeat_interval_ms.unwrap_or(0);
        override_from_env(ENV_HEARTBEAT_MS, &mut heartbeat);
        config.heartbeat_interval_ms = (heartbeat != 0).then_some(heartbeat);
        config
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_ms
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

fn override_from_env<T: FromStr>(var: &str, slot: &mut T) {
    let Ok(raw) = env::var(var) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => warn!(variable = var, value = %raw, "ignoring unparsable configuration value"),
    }
}
