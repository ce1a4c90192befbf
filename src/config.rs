//! Client configuration: defaults, then environment, then command-line flags.

use std::{num::NonZeroUsize, time::Duration};

use thiserror::Error;
use url::Url;

use crate::domain::DEFAULT_TOP_N;

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REPORT_TTL: Duration = Duration::from_secs(5 * 60);

pub const ENV_API_URL: &str = "ERP_API_URL";
pub const ENV_TIMEOUT_SECS: &str = "ERP_TIMEOUT_SECS";
pub const ENV_REPORT_TTL_SECS: &str = "ERP_REPORT_TTL_SECS";
pub const ENV_TOP_N: &str = "ERP_TOP_N";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid API base URL {value:?}: {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Base URL of the REST API, always ending in `/`.
    pub api_base_url: Url,
    pub request_timeout: Duration,
    /// How long a fetched period report is served from memory.
    pub report_cache_ttl: Duration,
    pub default_top_n: NonZeroUsize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: Url::parse(DEFAULT_API_URL).expect("default API URL is valid"),
            request_timeout: DEFAULT_TIMEOUT,
            report_cache_ttl: DEFAULT_REPORT_TTL,
            default_top_n: DEFAULT_TOP_N,
        }
    }
}

impl Settings {
    /// Load settings from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings from any key/value source; unset or empty keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut settings = Self::default();

        if let Some(url) = read(ENV_API_URL) {
            settings = settings.with_api_url(&url)?;
        }
        if let Some(value) = read(ENV_TIMEOUT_SECS) {
            settings.request_timeout =
                Duration::from_secs(parse_positive(ENV_TIMEOUT_SECS, &value)?.get() as u64);
        }
        if let Some(value) = read(ENV_REPORT_TTL_SECS) {
            settings.report_cache_ttl =
                Duration::from_secs(parse_positive(ENV_REPORT_TTL_SECS, &value)?.get() as u64);
        }
        if let Some(value) = read(ENV_TOP_N) {
            settings.default_top_n = parse_positive(ENV_TOP_N, &value)?;
        }

        Ok(settings)
    }

    /// Replace the API base URL. A missing trailing slash is added so relative
    /// endpoint paths join under it instead of replacing its last segment.
    pub fn with_api_url(mut self, raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        let normalized = if trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{trimmed}/")
        };
        self.api_base_url = Url::parse(&normalized).map_err(|source| ConfigError::InvalidUrl {
            value: raw.to_string(),
            source,
        })?;
        Ok(self)
    }
}

fn parse_positive(name: &'static str, value: &str) -> Result<NonZeroUsize, ConfigError> {
    value
        .trim()
        .parse::<NonZeroUsize>()
        .map_err(|_| ConfigError::InvalidNumber {
            name,
            value: value.to_string(),
        })
}
