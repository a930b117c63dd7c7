use crate::error::ConfigError;
use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Environment variable prefix read by [`ServiceConfig::load`].
pub const ENV_PREFIX: &str = "SERVIOS_";

fn default_timeout() -> Duration {
    servios_http::DEFAULT_REQUEST_TIMEOUT
}

fn default_mock_delay() -> Duration {
    servios_http::DEFAULT_MOCK_DELAY
}

fn default_retry_on_status() -> Vec<u16> {
    vec![StatusCode::UNAUTHORIZED.as_u16()]
}

/// Configuration of one service client. Immutable once the client is built.
///
/// ```yaml
/// base_url: https://api.example.com/v1
/// timeout: 5s
/// headers:
///   x-tenant: acme
/// use_mock: false
/// mock_delay: 250ms
/// retry_on_status: [401, 419]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Base address every relative endpoint is joined to (required).
    pub base_url: String,

    /// Per-request timeout (default: 10s).
    #[serde(default = "default_timeout", with = "servios_utils::humantime_serde")]
    pub timeout: Duration,

    /// Headers sent with every request unless a call overrides them.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Serve registered mock data for every call, not only forced ones.
    #[serde(default)]
    pub use_mock: bool,

    /// Artificial latency for mocked replies (default: 1s).
    #[serde(default = "default_mock_delay", with = "servios_utils::humantime_serde")]
    pub mock_delay: Duration,

    /// Statuses treated as an expired access token (default: `[401]`).
    #[serde(default = "default_retry_on_status")]
    pub retry_on_status: Vec<u16>,
}

impl ServiceConfig {
    /// Config with defaults for everything but the base address.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: default_timeout(),
            headers: BTreeMap::new(),
            use_mock: false,
            mock_delay: default_mock_delay(),
            retry_on_status: default_retry_on_status(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_mock(mut self, use_mock: bool) -> Self {
        self.use_mock = use_mock;
        self
    }

    #[must_use]
    pub fn with_mock_delay(mut self, delay: Duration) -> Self {
        self.mock_delay = delay;
        self
    }

    #[must_use]
    pub fn with_retry_on_status(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retry_on_status = statuses.into_iter().collect();
        self
    }

    /// Check every field that can be wrong before any request is made.
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parsed_base_url()?;
        self.header_map()?;
        self.retry_statuses()?;
        Ok(())
    }

    /// Parse `base_url`; only absolute `http`/`https` addresses are accepted.
    ///
    /// # Errors
    /// `MissingBaseUrl` when blank, `InvalidBaseUrl` otherwise.
    pub fn parsed_base_url(&self) -> Result<Url, ConfigError> {
        let raw = self.base_url.trim();
        if raw.is_empty() {
            return Err(ConfigError::MissingBaseUrl);
        }
        let url = Url::parse(raw).map_err(|e| ConfigError::InvalidBaseUrl {
            url: raw.to_owned(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::InvalidBaseUrl {
                url: raw.to_owned(),
                reason: format!("unsupported scheme '{other}'"),
            }),
        }
    }

    /// The default headers as a validated [`HeaderMap`].
    ///
    /// # Errors
    /// `InvalidHeader` for the first bad name or value.
    pub fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let invalid = |reason: String| ConfigError::InvalidHeader {
                name: name.clone(),
                reason,
            };
            let header_name =
                HeaderName::try_from(name.as_str()).map_err(|e| invalid(e.to_string()))?;
            let header_value =
                HeaderValue::try_from(value.as_str()).map_err(|e| invalid(e.to_string()))?;
            map.insert(header_name, header_value);
        }
        Ok(map)
    }

    /// The retryable statuses as [`StatusCode`]s.
    ///
    /// # Errors
    /// `InvalidStatus` for a number outside 100..=999.
    pub fn retry_statuses(&self) -> Result<Vec<StatusCode>, ConfigError> {
        self.retry_on_status
            .iter()
            .map(|&code| StatusCode::from_u16(code).map_err(|_| ConfigError::InvalidStatus(code)))
            .collect()
    }

    /// Extract and validate a config from an existing figment.
    ///
    /// # Errors
    /// `Load` when extraction fails, or any [`validate`](Self::validate) error.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file overlaid with `SERVIOS_*` environment variables.
    ///
    /// # Errors
    /// See [`from_figment`](Self::from_figment).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX));
        tracing::debug!(path = %path.as_ref().display(), "loading service configuration");
        Self::from_figment(&figment)
    }
}
