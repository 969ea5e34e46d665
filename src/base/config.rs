//! Load configuration via `config` crate with env-override support.

use std::{ops::Deref, sync::Arc};

use serde::Deserialize;

use super::types::Res;

/// Default bind address for the HTTP server.
fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

/// Default TomTom API base URL.
fn default_tomtom_base_url() -> String {
    "https://api.tomtom.com".to_string()
}

/// Default OpenRouter API base URL.
fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

/// Default model used for AI traffic analysis.
fn default_ai_model() -> String {
    "deepseek/deepseek-r1-0528-qwen3-8b:free".to_string()
}

/// Default model used when falling back to the OpenAI API directly.
fn default_openai_model() -> String {
    "gpt-3.5-turbo".to_string()
}

/// Default sampling temperature for analysis requests.
fn default_ai_temperature() -> f32 {
    0.7
}

/// Default max output tokens for analysis requests.
fn default_ai_max_tokens() -> u32 {
    2000
}

/// Default database endpoint (in-memory engine).
fn default_db_endpoint() -> String {
    "mem://".to_string()
}

/// Default interval between background collection runs, in seconds.
fn default_collection_interval_secs() -> u64 {
    900
}

/// Default interval between cleanup runs, in seconds.
fn default_cleanup_interval_secs() -> u64 {
    86_400
}

/// Default retention window for collected data, in days.
fn default_retention_days() -> i64 {
    30
}

fn default_true() -> bool {
    true
}

/// Configuration for the backend application.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConfigInner {
    /// Address the HTTP server binds to (`BIND_ADDR`).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// TomTom API key (`TOMTOM_API_KEY`).
    #[serde(default)]
    pub tomtom_api_key: String,
    /// TomTom API base URL (`TOMTOM_BASE_URL`).
    #[serde(default = "default_tomtom_base_url")]
    pub tomtom_base_url: String,
    /// OpenRouter API key (`OPENROUTER_API_KEY`). Preferred over OpenAI when both are set.
    #[serde(default)]
    pub openrouter_api_key: String,
    /// OpenRouter API base URL (`OPENROUTER_BASE_URL`).
    #[serde(default = "default_openrouter_base_url")]
    pub openrouter_base_url: String,
    /// OpenAI API key (`OPENAI_API_KEY`).
    #[serde(default)]
    pub openai_api_key: String,
    /// Model to use for AI traffic analysis via OpenRouter (`AI_MODEL`).
    #[serde(default = "default_ai_model")]
    pub ai_model: String,
    /// Model to use when calling OpenAI directly (`OPENAI_MODEL`).
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    /// Sampling temperature for analysis requests (`AI_TEMPERATURE`).
    /// Value between 0 and 2. Higher values make output more random.
    #[serde(default = "default_ai_temperature")]
    pub ai_temperature: f32,
    /// Max output tokens for analysis requests (`AI_MAX_TOKENS`).
    #[serde(default = "default_ai_max_tokens")]
    pub ai_max_tokens: u32,
    /// Google OAuth client ID used to validate ID tokens (`GOOGLE_CLIENT_ID`).
    #[serde(default)]
    pub google_client_id: String,
    /// Database endpoint URL (`DB_ENDPOINT`), e.g. `mem://` or `ws://localhost:8080`.
    #[serde(default = "default_db_endpoint")]
    pub db_endpoint: String,
    /// Database username (`DB_USERNAME`), only used for remote endpoints.
    #[serde(default)]
    pub db_username: String,
    /// Database password (`DB_PASSWORD`), only used for remote endpoints.
    #[serde(default)]
    pub db_password: String,
    /// Whether the background collectors run alongside the server (`COLLECTORS_ENABLED`).
    #[serde(default = "default_true")]
    pub collectors_enabled: bool,
    /// Interval between combined collection runs, in seconds (`COLLECTION_INTERVAL_SECS`).
    #[serde(default = "default_collection_interval_secs")]
    pub collection_interval_secs: u64,
    /// Interval between cleanup runs, in seconds (`CLEANUP_INTERVAL_SECS`).
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Days of collected data to keep before cleanup deletes it (`RETENTION_DAYS`).
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Config {
    pub fn load(explicit_path: Option<&std::path::Path>) -> Res<Self> {
        let mut cfg = config::Config::builder().add_source(config::Environment::default().prefix("MOVESMART"));

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if std::path::Path::new("movesmart.toml").exists() {
            cfg = cfg.add_source(config::File::with_name("movesmart"));
        }

        let result = Config {
            inner: Arc::new(cfg.build()?.try_deserialize()?),
        };

        if result.ai_temperature < 0.0 || result.ai_temperature > 2.0 {
            return Err(anyhow::anyhow!("AI temperature must be between 0 and 2."));
        }

        if result.ai_max_tokens < 1 || result.ai_max_tokens > 128000 {
            return Err(anyhow::anyhow!("AI max tokens must be between 1 and 128000."));
        }

        if result.retention_days < 1 {
            return Err(anyhow::anyhow!("Retention must be at least one day."));
        }

        Ok(result)
    }

    /// Build a config directly from an inner value, mostly useful in tests.
    pub fn from_inner(inner: ConfigInner) -> Self {
        Self { inner: Arc::new(inner) }
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = Config::from_inner(ConfigInner {
            bind_addr: default_bind_addr(),
            tomtom_base_url: default_tomtom_base_url(),
            ai_model: default_ai_model(),
            ai_temperature: default_ai_temperature(),
            ai_max_tokens: default_ai_max_tokens(),
            db_endpoint: default_db_endpoint(),
            collection_interval_secs: default_collection_interval_secs(),
            retention_days: default_retention_days(),
            ..Default::default()
        });

        assert_eq!(config.bind_addr, "0.0.0.0:8000");
        assert_eq!(config.db_endpoint, "mem://");
        assert_eq!(config.collection_interval_secs, 900);
        assert!(config.tomtom_api_key.is_empty());
    }
}
