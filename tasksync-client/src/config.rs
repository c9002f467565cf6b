use backon::ExponentialBuilder;
use std::time::Duration;
use tasksync_core::{SyncError, SyncResult};

use crate::ui_state::TaskOrder;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// Backoff used to re-establish the change feed after a disconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Attempts before the subscription cools down for `max_delay` and starts
    /// a new round.
    pub attempts_per_round: usize,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
            attempts_per_round: 8,
        }
    }
}

impl ReconnectPolicy {
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.attempts_per_round)
            .with_jitter()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub server_url: String,
    /// SQLite URL of the durable task cache, e.g. `sqlite://tasks.db`.
    pub cache_url: Option<String>,
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub order: TaskOrder,
    pub live_updates: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            cache_url: None,
            request_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            order: TaskOrder::default(),
            live_updates: true,
        }
    }
}

impl ClientConfig {
    /// Reads `TASKSYNC_SERVER`, `TASKSYNC_CACHE` and `TASKSYNC_TIMEOUT_MS`.
    pub fn from_env() -> SyncResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> SyncResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup("TASKSYNC_SERVER") {
            config.server_url = url;
        }
        config.cache_url = lookup("TASKSYNC_CACHE").filter(|url| !url.is_empty());
        if let Some(raw) = lookup("TASKSYNC_TIMEOUT_MS") {
            let millis: u64 = raw.parse().map_err(|_| {
                SyncError::validation(format!("TASKSYNC_TIMEOUT_MS must be an integer, got {raw:?}"))
            })?;
            config.request_timeout = Duration::from_millis(millis);
        }
        Ok(config)
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    pub fn with_cache_url(mut self, url: impl Into<String>) -> Self {
        self.cache_url = Some(url.into());
        self
    }

    pub fn with_order(mut self, order: TaskOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_live_updates(mut self, enabled: bool) -> Self {
        self.live_updates = enabled;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("TASKSYNC_SERVER", "http://tasks.internal:9000"),
            ("TASKSYNC_CACHE", "sqlite::memory:"),
            ("TASKSYNC_TIMEOUT_MS", "2500"),
        ]
        .into_iter()
        .collect();

        let config = ClientConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.server_url, "http://tasks.internal:9000");
        assert_eq!(config.cache_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
        assert!(config.live_updates);
    }

    #[test]
    fn test_config_defaults_and_bad_timeout() {
        let config = ClientConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ClientConfig::default());

        let err = ClientConfig::from_lookup(|k| {
            (k == "TASKSYNC_TIMEOUT_MS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }
}
