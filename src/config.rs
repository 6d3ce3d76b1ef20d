use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub session: SessionStoreConfig,
}

/// Opaque credential handed to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Sent as `X-API-Key` on REST and `api_key=` on the socket
    ApiKey(String),
    /// Sent as a bearer token on REST and `access_token=` on the socket
    AccessToken(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// REST base, e.g. `https://dashboard.example.com/api/v1`
    pub api_base: String,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub tenant_id: Option<String>,
    /// Contextual ids sent with every conversation start
    pub operator_id: Uuid,
    pub data_source_id: Uuid,
    pub lang: String,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000/api/v1".to_string(),
            api_key: None,
            access_token: None,
            tenant_id: None,
            operator_id: Uuid::nil(),
            data_source_id: Uuid::nil(),
            lang: "en".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl BackendConfig {
    /// Access token wins over API key when both are set
    pub fn credential(&self) -> Option<Credential> {
        self.access_token
            .clone()
            .map(Credential::AccessToken)
            .or_else(|| self.api_key.clone().map(Credential::ApiKey))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Socket base; derived from `backend.api_base` when unset
    pub base_url: Option<String>,
    pub connect_timeout_secs: u64,
    /// 0 disables automatic reconnection
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    /// `topics=` name requested for chat messages; some backends broadcast
    /// them under `messages`
    pub message_topic: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            connect_timeout_secs: 10,
            max_reconnect_attempts: 0,
            reconnect_delay_ms: 500,
            max_reconnect_delay_ms: 30_000,
            message_topic: "message".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionStoreConfig {
    /// Directory holding persisted session records (`~` is expanded)
    pub dir: String,
    pub key: String,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            dir: "~/.convo-sync".to_string(),
            key: "convo-sync.session".to_string(),
        }
    }
}

impl SessionStoreConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.dir).into_owned())
    }
}

impl Config {
    /// Load from `path` (any format the `config` crate understands) plus
    /// `CONVO_SYNC__SECTION__KEY` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("CONVO_SYNC").separator("__"))
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_token_preferred() {
        let backend = BackendConfig {
            api_key: Some("key".to_string()),
            access_token: Some("token".to_string()),
            ..Default::default()
        };
        assert_eq!(backend.credential(), Some(Credential::AccessToken("token".to_string())));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("convo-sync.toml");
        std::fs::write(
            &path,
            r#"
[backend]
api_base = "https://example.com/api/v1"
api_key = "secret"
operator_id = "00000000-0000-0000-0000-000000000001"
data_source_id = "00000000-0000-0000-0000-000000000002"
lang = "de"
request_timeout_secs = 5

[streaming]
connect_timeout_secs = 3
max_reconnect_attempts = 2
reconnect_delay_ms = 100
max_reconnect_delay_ms = 1000
"#,
        )
        .unwrap();

        let cfg = Config::load(path.with_extension("").to_str().unwrap()).unwrap();
        assert_eq!(cfg.backend.api_base, "https://example.com/api/v1");
        assert_eq!(cfg.backend.lang, "de");
        assert_eq!(cfg.backend.credential(), Some(Credential::ApiKey("secret".to_string())));
        assert_eq!(cfg.streaming.max_reconnect_attempts, 2);
        assert_eq!(cfg.session.key, "convo-sync.session");
    }
}
