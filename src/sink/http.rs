//! HTTP push sink.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Sink, SinkError, SinkKind};
use crate::config::{ConfigError, expand_env_vars};
use crate::encoder::{DEFAULT_TTL, EncoderKind};

/// Default request timeout (10 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest response body excerpt kept in a rejection.
const MAX_BODY_EXCERPT: usize = 256;

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_encoder() -> EncoderKind {
    EncoderKind::LineProtocol
}

fn default_ttl() -> Duration {
    DEFAULT_TTL
}

/// Configuration for an HTTP write endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSinkConfig {
    /// Unique name for this sink.
    pub name: String,
    /// Write URL, e.g. `http://localhost:8086/write`.
    pub url: String,
    /// Database, sent as the `db` query parameter.
    #[serde(default)]
    pub db: Option<String>,
    /// Sent as `u`, `${VAR}` expanded.
    #[serde(default)]
    pub username: Option<String>,
    /// Sent as `p`, `${VAR}` expanded.
    #[serde(default)]
    pub password: Option<String>,
    /// Request timeout (default: 10s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Payload encoding (default: line_protocol).
    #[serde(default = "default_encoder")]
    pub encoder: EncoderKind,
    /// Event TTL for event encoders (default: 120s).
    #[serde(default = "default_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

impl HttpSinkConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            db: None,
            username: None,
            password: None,
            timeout: DEFAULT_TIMEOUT,
            encoder: default_encoder(),
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.url).map_err(|e| {
            ConfigError::ValidationError(format!(
                "sink '{}': invalid url '{}': {e}",
                self.name, self.url
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "sink '{}': url must be http or https, got '{}'",
                self.name,
                url.scheme()
            )));
        }
        Ok(())
    }
}

/// HTTP push sink.
pub struct HttpSink {
    name: String,
    url: url::Url,
    timeout: Duration,
    client: Client,
}

impl HttpSink {
    /// Create a new HTTP sink.
    ///
    /// # Errors
    /// Returns `ConfigError` for an invalid URL or if the HTTP client cannot
    /// be built.
    pub fn new(config: &HttpSinkConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut url = url::Url::parse(&config.url)
            .map_err(|e| ConfigError::ValidationError(format!("invalid url: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(ref db) = config.db {
                query.append_pair("db", db);
            }
            if let Some(ref username) = config.username {
                query.append_pair("u", &expand_env_vars(username));
            }
            if let Some(ref password) = config.password {
                query.append_pair("p", &expand_env_vars(password));
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                ConfigError::ValidationError(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            name: config.name.clone(),
            url,
            timeout: config.timeout,
            client,
        })
    }
}

impl std::fmt::Debug for HttpSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The query carries credentials.
        f.debug_struct("HttpSink")
            .field("name", &self.name)
            .field("host", &self.url.host_str())
            .field("path", &self.url.path())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Http
    }

    async fn send(&self, payload: &[u8]) -> Result<(), SinkError> {
        let response = self
            .client
            .post(self.url.clone())
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SinkError::Timeout(self.timeout)
                } else {
                    SinkError::Unreachable(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(
                sink = %self.name,
                status = status.as_u16(),
                bytes = payload.len(),
                "Payload accepted"
            );
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_BODY_EXCERPT {
            let mut end = MAX_BODY_EXCERPT;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }
        Err(SinkError::Rejected {
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }
}
