//! Runtime configuration for the sync core.

use anyhow::Context;

/// Settings needed to reach the remote session store.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the edge function API, without a trailing slash.
    pub api_url: String,
    /// Project key sent as the `apikey` header.
    pub api_key: Option<String>,
    /// Bearer credential. When unset the token file under the data dir is used.
    pub access_token: Option<String>,
}

/// Tracing output settings
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub filter: Option<String>,
    pub format: LogFormat,
    pub truncate_on_start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("pretty") {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: None,
            format: LogFormat::Json,
            truncate_on_start: false,
        }
    }
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self {
            filter: non_empty_env("NINO_LOG_FILTER"),
            format: non_empty_env("NINO_LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or(LogFormat::Json),
            truncate_on_start: std::env::var("NINO_TRUNCATE_LOG_ON_START").as_deref() == Ok("1"),
        }
    }
}

impl SyncConfig {
    /// Load configuration from `NINO_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::resolve(None, None, None)
    }

    /// Explicit values win over the matching `NINO_*` variables.
    pub fn resolve(
        api_url: Option<String>,
        api_key: Option<String>,
        access_token: Option<String>,
    ) -> anyhow::Result<Self> {
        let api_url = api_url
            .filter(|v| !v.trim().is_empty())
            .or_else(|| non_empty_env("NINO_API_URL"))
            .context("NINO_API_URL is not set")?;
        Ok(Self {
            api_url: normalize_base_url(&api_url),
            api_key: api_key.or_else(|| non_empty_env("NINO_API_KEY")),
            access_token: access_token.or_else(|| non_empty_env("NINO_ACCESS_TOKEN")),
        })
    }
}

/// Strip trailing slashes so routes can be appended with `format!`.
pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
