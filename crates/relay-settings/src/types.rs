//! Settings for the relay server, its upstream provider, and the chat client.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    pub client: ClientSettings,
}

/// Relay server network settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// WebSocket port.
    pub port: u16,
    /// Outbound frames buffered per connection.
    pub max_send_queue: usize,
    /// WebSocket ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_send_queue: 1024,
            heartbeat_interval_ms: 30_000,
        }
    }
}

/// Upstream completion provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    pub model: String,
    pub base_url: String,
    /// Provider credential. Only ever read from the environment.
    #[serde(skip)]
    pub api_key: Option<SecretString>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4.1-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
        }
    }
}

/// Interactive client settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Relay WebSocket URL.
    pub url: String,
    /// Fixed delay before reconnecting after the transport closes.
    pub reconnect_delay_ms: u64,
    /// Interval between revealed characters.
    pub pace_interval_ms: u64,
    /// Conversation history database. Relative paths resolve under the
    /// settings directory.
    pub history_db: String,
    /// Key the conversation history is stored under.
    pub history_key: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080".to_string(),
            reconnect_delay_ms: 6_000,
            pace_interval_ms: 10,
            history_db: "history.db".to_string(),
            history_key: "chat_history".to_string(),
        }
    }
}

impl ClientSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn pace_interval(&self) -> Duration {
        Duration::from_millis(self.pace_interval_ms)
    }

    /// Absolute path of the history database.
    pub fn history_db_path(&self, settings_dir: &std::path::Path) -> PathBuf {
        let path = PathBuf::from(&self.history_db);
        if path.is_absolute() {
            path
        } else {
            settings_dir.join(path)
        }
    }
}
