use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageConfig,
    pub conversation: ConversationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Prefer the networked primary backend; the file fallback is always
    /// available regardless
    pub use_primary: bool,
    pub primary: PrimaryConfig,
    pub fallback: FallbackConfig,
    /// Default retention window for cleanup, in days
    pub retention_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimaryConfig {
    pub host: String,
    pub port: u16,
    pub database: u16,
    pub password: Option<String>,
    pub connect_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    /// Refresh interval for live status displays
    pub health_check_interval_ms: u64,
    /// Bounded immediate reconnection attempts before `connect` gives up
    pub connect_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub directory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// How many recent messages form the inference context window
    pub max_context_messages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            use_primary: true,
            primary: PrimaryConfig::default(),
            fallback: FallbackConfig::default(),
            retention_days: 30,
        }
    }
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: 0,
            password: None,
            connect_timeout_ms: 2_000,
            operation_timeout_ms: 2_000,
            health_check_interval_ms: 30_000,
            connect_attempts: 3,
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            directory: "./conversations".to_string(),
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_context_messages: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PrimaryConfig {
    /// Connection URL in the `redis://[:password@]host:port/db` convention
    pub fn url(&self) -> String {
        let mut url = String::from("redis://");
        if let Some(ref password) = self.password {
            url.push(':');
            url.push_str(password);
            url.push('@');
        }
        url.push_str(&format!("{}:{}/{}", self.host, self.port, self.database));
        url
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_env = env::var("CONFIG_ENV").unwrap_or_else(|_| "default".to_string());

        let config = Config::builder()
            .add_source(File::with_name(&format!("config/{}", config_env)).required(false))
            .add_source(Environment::with_prefix("CHATVAULT").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_usable() {
        let settings = Settings::default();
        assert!(settings.storage.use_primary);
        assert_eq!(settings.storage.primary.port, 6379);
        assert_eq!(settings.storage.retention_days, 30);
        assert_eq!(settings.conversation.max_context_messages, 10);
    }

    #[test]
    fn test_url_formats() {
        let mut primary = PrimaryConfig::default();
        assert_eq!(primary.url(), "redis://127.0.0.1:6379/0");

        primary.password = Some("s3cret".to_string());
        primary.port = 6380;
        primary.database = 2;
        assert_eq!(primary.url(), "redis://:s3cret@127.0.0.1:6380/2");
    }
}
