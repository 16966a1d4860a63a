//! Service health collector.
//!
//! Probes a named endpoint within a bounded timeout and records
//! `service.status` (1 up, 0 down) and `service.latency` in milliseconds.
//!
//! | Outcome                     | status | state    | result                 |
//! |-----------------------------|--------|----------|------------------------|
//! | up                          | 1      | ok       | `Ok`                   |
//! | HTTP status != expected     | 0      | warning  | `Ok`                   |
//! | command exits non-zero      | 0      | critical | `Err(Unavailable)`     |
//! | connect / request failure   | 0      | critical | `Err(Unavailable)`     |
//! | no answer within timeout    | 0      | critical | `Err(Timeout)`         |

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

use crate::collector::command::run_command;
use crate::collector::{CollectError, CollectErrorKind, Collector, CollectorKind, Schedule, Tick};
use crate::config::{ConfigError, expand_env_vars};
use crate::sample::{Batch, Sample, State, Tags};

/// Default collection interval (30 seconds).
const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Default probe timeout (10 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default expected HTTP status code.
const DEFAULT_EXPECTED_STATUS: u16 = 200;

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_expected_status() -> u16 {
    DEFAULT_EXPECTED_STATUS
}

/// HTTP health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProbe {
    /// Target URL (HTTP or HTTPS).
    pub url: String,
    /// Expected HTTP status code (default: 200).
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    /// Basic auth user, `${VAR}` expanded.
    #[serde(default)]
    pub username: Option<String>,
    /// Basic auth password, `${VAR}` expanded.
    #[serde(default)]
    pub password: Option<String>,
}

/// TCP connect probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpProbe {
    pub host: String,
    pub port: u16,
}

/// Exit-status probe, e.g. `pg_isready -h localhost`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandProbe {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// How a service is probed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Probe {
    Http(HttpProbe),
    Tcp(TcpProbe),
    Command(CommandProbe),
}

impl Probe {
    /// Probe target, for logs.
    pub fn target(&self) -> String {
        match self {
            Self::Http(p) => p.url.clone(),
            Self::Tcp(p) => format!("{}:{}", p.host, p.port),
            Self::Command(p) => p.program.clone(),
        }
    }
}

/// Configuration for a service health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Unique name for this probe; also the `service` tag value.
    pub name: String,
    /// Enable this collector (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub probe: Probe,
    /// Collection interval (mutually exclusive with cron).
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    /// Cron schedule expression (mutually exclusive with interval).
    #[serde(default)]
    pub cron: Option<String>,
    /// Probe timeout (default: 10s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Static tags added to every sample.
    #[serde(default)]
    pub tags: Tags,
}

impl ServiceConfig {
    /// Create a new service probe configuration.
    pub fn new(name: impl Into<String>, probe: Probe) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            probe,
            interval: Some(DEFAULT_INTERVAL),
            cron: None,
            timeout: DEFAULT_TIMEOUT,
            tags: Tags::new(),
        }
    }

    /// HTTP probe expecting status 200.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            name,
            Probe::Http(HttpProbe {
                url: url.into(),
                expected_status: DEFAULT_EXPECTED_STATUS,
                username: None,
                password: None,
            }),
        )
    }

    /// TCP connect probe.
    pub fn tcp(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self::new(
            name,
            Probe::Tcp(TcpProbe {
                host: host.into(),
                port,
            }),
        )
    }

    /// Command exit-status probe.
    pub fn command(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(
            name,
            Probe::Command(CommandProbe {
                program: program.into(),
                args,
            }),
        )
    }

    /// Resolve the configured schedule.
    pub fn schedule(&self) -> Result<Schedule, ConfigError> {
        Schedule::from_parts(self.interval, self.cron.as_deref(), DEFAULT_INTERVAL)
    }

    /// Set the collection interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self.cron = None;
        self
    }

    /// Set the cron schedule.
    pub fn with_cron(mut self, cron: impl Into<String>) -> Self {
        self.cron = Some(cron.into());
        self.interval = None;
        self
    }

    /// Set the probe timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the expected HTTP status. No effect on non-HTTP probes.
    pub fn with_expected_status(mut self, status: u16) -> Self {
        if let Probe::Http(ref mut http) = self.probe {
            http.expected_status = status;
        }
        self
    }

    /// Set basic auth credentials. No effect on non-HTTP probes.
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        if let Probe::Http(ref mut http) = self.probe {
            http.username = Some(username.into());
            http.password = Some(password.into());
        }
        self
    }

    /// Set static tags.
    pub fn with_static_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        match &self.probe {
            Probe::Http(http) => {
                url::Url::parse(&http.url).map_err(|e| {
                    ConfigError::ValidationError(format!(
                        "service '{}': invalid url '{}': {e}",
                        self.name, http.url
                    ))
                })?;
            }
            Probe::Tcp(tcp) => {
                if tcp.host.trim().is_empty() || tcp.port == 0 {
                    return Err(ConfigError::ValidationError(format!(
                        "service '{}': tcp probe needs a host and a non-zero port",
                        self.name
                    )));
                }
            }
            Probe::Command(cmd) => {
                if cmd.program.trim().is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "service '{}': command probe needs a program",
                        self.name
                    )));
                }
            }
        }
        self.schedule().map(|_| ())
    }
}

/// Basic auth credentials after env expansion.
#[derive(Clone)]
struct Credentials {
    username: String,
    password: Option<String>,
}

/// Result of one probe before it is mapped to samples.
enum Outcome {
    Up,
    /// Reached the service but it answered unexpectedly.
    Degraded(String),
    Down(CollectErrorKind, String),
}

/// Service health collector.
pub struct ServiceCollector {
    config: ServiceConfig,
    schedule: Schedule,
    client: Client,
    credentials: Option<Credentials>,
}

impl ServiceCollector {
    /// Create a new service collector.
    ///
    /// # Errors
    /// Returns `ConfigError` for an invalid probe or schedule, or if the HTTP
    /// client cannot be built.
    pub fn new(config: ServiceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let schedule = config.schedule()?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                ConfigError::ValidationError(format!("failed to build HTTP client: {e}"))
            })?;

        let credentials = match &config.probe {
            Probe::Http(HttpProbe {
                username: Some(username),
                password,
                ..
            }) => Some(Credentials {
                username: expand_env_vars(username),
                password: password.as_deref().map(expand_env_vars),
            }),
            _ => None,
        };

        Ok(Self {
            config,
            schedule,
            client,
            credentials,
        })
    }

    async fn probe_http(&self, http: &HttpProbe) -> Outcome {
        let mut request = self.client.get(&http.url);
        if let Some(ref creds) = self.credentials {
            request = request.basic_auth(&creds.username, creds.password.as_ref());
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if status == http.expected_status {
                    Outcome::Up
                } else {
                    Outcome::Degraded(format!(
                        "status {status}, expected {}",
                        http.expected_status
                    ))
                }
            }
            Err(e) if e.is_timeout() => Outcome::Down(CollectErrorKind::Timeout, e.to_string()),
            Err(e) => Outcome::Down(CollectErrorKind::Unavailable, e.to_string()),
        }
    }

    async fn probe_tcp(&self, tcp: &TcpProbe) -> Outcome {
        let addr = format!("{}:{}", tcp.host, tcp.port);
        match TcpStream::connect(&addr).await {
            Ok(_) => Outcome::Up,
            Err(e) => Outcome::Down(CollectErrorKind::Unavailable, format!("connect {addr}: {e}")),
        }
    }

    async fn probe_command(&self, cmd: &CommandProbe) -> Outcome {
        match run_command(&cmd.program, &cmd.args, self.config.timeout).await {
            Ok(output) if output.success() => Outcome::Up,
            Ok(output) => Outcome::Down(
                CollectErrorKind::Unavailable,
                format!(
                    "'{}' exited with {:?}: {}",
                    cmd.program,
                    output.code,
                    output.stderr_summary()
                ),
            ),
            Err(e) => Outcome::Down(e.kind, e.detail),
        }
    }

    fn samples(&self, status: f64, state: State, latency_ms: f64, timestamp: i64) -> Batch {
        let base = |name: &str, value: f64| {
            Sample::new(name, value, timestamp)
                .with_tags(&self.config.tags)
                .with_tag("service", &self.config.name)
        };
        Batch::from(vec![
            base("service.status", status).with_state(state),
            base("service.latency", latency_ms),
        ])
    }
}

impl std::fmt::Debug for ServiceCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCollector")
            .field("name", &self.config.name)
            .field("probe", &self.config.probe.target())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Collector for ServiceCollector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> CollectorKind {
        CollectorKind::Service
    }

    fn schedule(&self) -> Schedule {
        self.schedule.clone()
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn poll(&self, tick: &Tick) -> Result<Batch, CollectError> {
        let probe_timeout = self.config.timeout;
        let start = Instant::now();

        let probe = async {
            match &self.config.probe {
                Probe::Http(http) => self.probe_http(http).await,
                Probe::Tcp(tcp) => self.probe_tcp(tcp).await,
                Probe::Command(cmd) => self.probe_command(cmd).await,
            }
        };
        let outcome = match tokio::time::timeout(probe_timeout, probe).await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::Down(
                CollectErrorKind::Timeout,
                format!("no answer within {}ms", probe_timeout.as_millis()),
            ),
        };
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Outcome::Up => {
                tracing::debug!(
                    name = %self.config.name,
                    target = %self.config.probe.target(),
                    latency_ms = latency_ms,
                    "Service probe successful"
                );
                Ok(self.samples(1.0, State::Ok, latency_ms, tick.timestamp()))
            }
            Outcome::Degraded(detail) => {
                tracing::warn!(
                    name = %self.config.name,
                    target = %self.config.probe.target(),
                    detail = %detail,
                    "Service probe failed conditions"
                );
                Ok(self.samples(0.0, State::Warning, latency_ms, tick.timestamp()))
            }
            Outcome::Down(kind, detail) => {
                let partial = self.samples(0.0, State::Critical, latency_ms, tick.timestamp());
                Err(CollectError::new(kind, detail).with_partial(partial))
            }
        }
    }
}
