use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub(crate) const CONFIG_FILE_NAME: &str = "avadeck_config.json";

const DEFAULT_HUB_URL: &str = "ws://127.0.0.1:5000/hub";
const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_ACCOUNT_POLL_MS: u64 = 30_000;
const DEFAULT_REGION_POLL_MS: u64 = 5_000;
const DEFAULT_NEARBY_POLL_MS: u64 = 10_000;
const DEFAULT_HISTORY_PAGE_SIZE: u32 = 50;
const DEFAULT_MESSAGE_LOG_CAP: usize = 200;
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RECONNECT_BACKOFF_MAX_MS: u64 = 30_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub(crate) disable_network: Option<bool>,
    pub(crate) hub_url: Option<String>,
    pub(crate) api_base_url: Option<String>,
    pub(crate) account_poll_interval_ms: Option<u64>,
    pub(crate) region_poll_interval_ms: Option<u64>,
    pub(crate) nearby_poll_interval_ms: Option<u64>,
    pub(crate) history_page_size: Option<u32>,
    pub(crate) message_log_cap: Option<usize>,
    pub(crate) command_timeout_ms: Option<u64>,
    pub(crate) reconnect_backoff_max_ms: Option<u64>,
}

pub(crate) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE_NAME);
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    match serde_json::from_slice::<AppConfig>(&bytes) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), %e, "ignoring unreadable config");
            AppConfig::default()
        }
    }
}

/// Pretty-printed config with every default spelled out.
pub(crate) fn default_app_config_json() -> String {
    let config = AppConfig {
        disable_network: Some(false),
        hub_url: Some(DEFAULT_HUB_URL.to_string()),
        api_base_url: Some(DEFAULT_API_BASE_URL.to_string()),
        account_poll_interval_ms: Some(DEFAULT_ACCOUNT_POLL_MS),
        region_poll_interval_ms: Some(DEFAULT_REGION_POLL_MS),
        nearby_poll_interval_ms: Some(DEFAULT_NEARBY_POLL_MS),
        history_page_size: Some(DEFAULT_HISTORY_PAGE_SIZE),
        message_log_cap: Some(DEFAULT_MESSAGE_LOG_CAP),
        command_timeout_ms: Some(DEFAULT_COMMAND_TIMEOUT_MS),
        reconnect_backoff_max_ms: Some(DEFAULT_RECONNECT_BACKOFF_MAX_MS),
    };
    serde_json::to_string_pretty(&config).unwrap_or_else(|_| "{}".to_string())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl AppConfig {
    pub(crate) fn network_enabled(&self) -> bool {
        // Used to keep Rust tests deterministic and offline.
        if let Some(disable) = self.disable_network {
            return !disable;
        }
        std::env::var("AVADECK_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }

    pub(crate) fn hub_url(&self) -> &str {
        non_empty(&self.hub_url).unwrap_or(DEFAULT_HUB_URL)
    }

    pub(crate) fn api_base_url(&self) -> &str {
        non_empty(&self.api_base_url).unwrap_or(DEFAULT_API_BASE_URL)
    }

    pub(crate) fn account_poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.account_poll_interval_ms
                .unwrap_or(DEFAULT_ACCOUNT_POLL_MS),
        )
    }

    pub(crate) fn region_poll_interval(&self) -> Duration {
        Duration::from_millis(self.region_poll_interval_ms.unwrap_or(DEFAULT_REGION_POLL_MS))
    }

    pub(crate) fn nearby_poll_interval(&self) -> Duration {
        Duration::from_millis(self.nearby_poll_interval_ms.unwrap_or(DEFAULT_NEARBY_POLL_MS))
    }

    pub(crate) fn history_page_size(&self) -> u32 {
        self.history_page_size
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_HISTORY_PAGE_SIZE)
    }

    pub(crate) fn message_log_cap(&self) -> usize {
        self.message_log_cap
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MESSAGE_LOG_CAP)
    }

    pub(crate) fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms.unwrap_or(DEFAULT_COMMAND_TIMEOUT_MS))
    }

    pub(crate) fn reconnect_backoff_max_ms(&self) -> u64 {
        self.reconnect_backoff_max_ms
            .unwrap_or(DEFAULT_RECONNECT_BACKOFF_MAX_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_app_config(&dir.path().to_string_lossy());
        assert_eq!(config.hub_url(), DEFAULT_HUB_URL);
        assert_eq!(config.region_poll_interval(), Duration::from_secs(5));
        assert_eq!(config.message_log_cap(), 200);
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            serde_json::json!({
                "disable_network": true,
                "hub_url": "wss://grid.example/hub",
                "history_page_size": 0,
            })
            .to_string(),
        )
        .unwrap();
        let config = load_app_config(&dir.path().to_string_lossy());
        assert!(!config.network_enabled());
        assert_eq!(config.hub_url(), "wss://grid.example/hub");
        assert_eq!(config.api_base_url(), DEFAULT_API_BASE_URL);
        assert_eq!(config.history_page_size(), DEFAULT_HISTORY_PAGE_SIZE);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), b"{not json").unwrap();
        let config = load_app_config(&dir.path().to_string_lossy());
        assert_eq!(config.command_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn default_json_parses_back() {
        let json = default_app_config_json();
        let config: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.disable_network, Some(false));
        assert_eq!(config.account_poll_interval_ms, Some(DEFAULT_ACCOUNT_POLL_MS));
    }
}
