use std::net::SocketAddr;
use std::path::PathBuf;

use url::Url;

// ── Defaults ─────────────────────────────────────────────────────────────────

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_BIND: &str = "0.0.0.0:8000";
const DEFAULT_USERS_FILE: &str = "users.json";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid bind address {0:?}")]
    Bind(String),
    #[error("invalid GEMINI_API_BASE {0:?}: {1}")]
    ApiBase(String, url::ParseError),
    #[error("invalid DERMASCAN_MAX_UPLOAD_BYTES {0:?}")]
    UploadLimit(String),
}

/// Process settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// `None` disables analysis; the service still starts.
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: Url,
    pub bind: SocketAddr,
    pub users_file: PathBuf,
    pub max_upload_bytes: usize,
    pub secure_cookies: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source so tests don't
    /// have to touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("GEMINI_API_KEY")
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        let model = lookup("GEMINI_MODEL")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let raw_base = lookup("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let api_base = Url::parse(raw_base.trim_end_matches('/'))
            .map_err(|e| ConfigError::ApiBase(raw_base.clone(), e))?;

        let raw_bind = lookup("DERMASCAN_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = raw_bind
            .parse()
            .map_err(|_| ConfigError::Bind(raw_bind.clone()))?;

        let users_file = lookup("DERMASCAN_USERS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_USERS_FILE));

        let max_upload_bytes = match lookup("DERMASCAN_MAX_UPLOAD_BYTES") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::UploadLimit(raw.clone()))?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let secure_cookies = lookup("DERMASCAN_SECURE_COOKIES").as_deref() == Some("1");

        Ok(Config {
            api_key,
            model,
            api_base,
            bind,
            users_file,
            max_upload_bytes,
            secure_cookies,
        })
    }
}
