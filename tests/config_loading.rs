//! Configuration Loading Tests for Vigil
//!
//! Loads YAML files from disk and checks validation failures surface as
//! `ConfigError` before anything starts.

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use vigil::collector::Probe;
use vigil::config::{AppConfig, ConfigError};
use vigil::encoder::EncoderKind;

// =============================================================================
// Test Helpers
// =============================================================================

const FULL_CONFIG: &str = r#"
agent:
  hostname: trust
  tags: { env: prod }
  error_delay: 10s
  self_report_interval: 60s
pipeline:
  max_attempts: 4
  queue_capacity: 500
  send_timeout: 5s
  shutdown_grace: 2s
  retry:   { base: 500ms, cap: 10s, jitter: true }
  breaker: { failure_threshold: 3, base: 10s, cap: 5m, jitter: false }
collectors:
  host:
    - name: host
      interval: 30s
  service:
    - name: alfresco
      probe:
        type: http
        url: http://localhost:8080/alfresco/
        username: admin
        password: ${VIGIL_TEST_UNSET_PASSWORD:-admin}
    - name: postgres
      cron: "0 */5 * * * *"
      probe: { type: command, program: pg_isready, args: ["-h", "localhost"] }
  container:
    - name: docker
      filter: [graphrag, riemann]
  gpu:
    - name: gpu
      enabled: false
sinks:
  http:
    - name: influx
      url: http://localhost:8086/write
      db: riemann
      username: riemann
      password: riemann
  tcp:
    - name: riemann
      address: localhost:5555
      encoder: event
  udp:
    - name: riemann-udp
      address: 127.0.0.1:5555
      encoder: text
"#;

const MINIMAL_SINKS: &str = r#"
sinks:
  tcp:
    - name: riemann
      address: localhost:5555
"#;

fn write_config(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn validation_message(result: Result<AppConfig, ConfigError>) -> String {
    match result {
        Err(ConfigError::ValidationError(msg)) => msg,
        Err(other) => panic!("expected validation error, got {other}"),
        Ok(_) => panic!("expected validation error, config was accepted"),
    }
}

// =============================================================================
// Loading
// =============================================================================

#[test]
fn test_load_full_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "vigil.yaml", FULL_CONFIG);

    let config = AppConfig::load(&path).unwrap();

    assert_eq!(config.agent.hostname(), "trust");
    assert_eq!(config.agent.error_delay, Duration::from_secs(10));
    assert_eq!(config.agent.self_report_interval, Some(Duration::from_secs(60)));
    let tags = config.agent.global_tags();
    assert_eq!(tags.get("host").map(String::as_str), Some("trust"));
    assert_eq!(tags.get("env").map(String::as_str), Some("prod"));

    assert_eq!(config.pipeline.max_attempts, 4);
    assert_eq!(config.pipeline.queue_capacity, 500);
    assert_eq!(config.pipeline.retry.base, Duration::from_millis(500));
    assert_eq!(config.pipeline.breaker.cap, Duration::from_secs(300));
    assert!(!config.pipeline.breaker.jitter);

    assert_eq!(config.collectors.len(), 5);
    assert!(matches!(config.collectors.service[1].probe, Probe::Command(_)));
    assert_eq!(config.sinks.tcp[0].encoder, EncoderKind::Event);
    assert_eq!(config.sinks.udp[0].encoder, EncoderKind::Text);
    assert_eq!(config.sinks.http[0].encoder, EncoderKind::LineProtocol);
}

#[tokio::test]
async fn test_build_from_loaded_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "vigil.yaml", FULL_CONFIG);
    let config = AppConfig::load(&path).unwrap();

    // The disabled gpu collector is skipped.
    let collectors = config.collectors.build().unwrap();
    let names: Vec<&str> = collectors.iter().map(|c| c.name()).collect();
    assert_eq!(names, vec!["host", "alfresco", "postgres", "docker"]);
    assert_eq!(collectors[2].schedule().to_string(), "cron: 0 */5 * * * *");

    let sinks = config.sinks.build().unwrap();
    assert_eq!(sinks.len(), 3);
}

#[test]
fn test_defaults_for_minimal_config() {
    let config = AppConfig::from_yaml_str(MINIMAL_SINKS).unwrap();

    assert!(config.collectors.is_empty());
    assert_eq!(config.agent.self_report_interval(), Some(Duration::from_secs(60)));
    assert_eq!(config.agent.error_delay, Duration::from_secs(30));
    assert_eq!(config.pipeline.max_attempts, 3);
    assert_eq!(config.pipeline.queue_capacity, 1000);
    assert_eq!(config.sinks.tcp[0].timeout, Duration::from_secs(5));
}

#[test]
fn test_collector_path_is_merged() {
    let dir = TempDir::new().unwrap();
    let extra = dir.path().join("collectors.d");
    std::fs::create_dir(&extra).unwrap();
    std::fs::write(
        extra.join("redis.yaml"),
        "service:\n  - name: redis\n    probe: { type: tcp, host: localhost, port: 6379 }\n",
    )
    .unwrap();
    std::fs::write(extra.join("notes.txt"), "ignored").unwrap();

    let main = format!(
        "collector_path: {}\ncollectors:\n  host:\n    - name: host\n{MINIMAL_SINKS}",
        extra.display()
    );
    let path = write_config(&dir, "vigil.yaml", &main);

    let config = AppConfig::load(&path).unwrap();
    assert_eq!(config.collectors.host.len(), 1);
    assert_eq!(config.collectors.service.len(), 1);
    assert_eq!(config.collectors.service[0].name, "redis");
}

#[test]
fn test_collector_path_duplicates_are_rejected() {
    let dir = TempDir::new().unwrap();
    let extra = dir.path().join("collectors.d");
    std::fs::create_dir(&extra).unwrap();
    std::fs::write(extra.join("host.yml"), "host:\n  - name: host\n").unwrap();

    let main = format!(
        "collector_path: {}\ncollectors:\n  host:\n    - name: host\n{MINIMAL_SINKS}",
        extra.display()
    );
    let path = write_config(&dir, "vigil.yaml", &main);

    let message = validation_message(AppConfig::load(&path));
    assert!(message.contains("duplicate collector name"));
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let result = AppConfig::load(dir.path().join("absent.yaml"));
    assert!(matches!(result, Err(ConfigError::IoError(_))));
}

#[test]
fn test_malformed_yaml_is_parse_error() {
    let result = AppConfig::from_yaml_str("sinks: [this is: not valid");
    assert!(matches!(result, Err(ConfigError::ParseError(_))));

    let result = AppConfig::from_yaml_str("pipeline:\n  send_timeout: soon\n");
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}

#[test]
fn test_config_without_sinks_is_rejected() {
    let message = validation_message(AppConfig::from_yaml_str(
        "collectors:\n  host:\n    - name: host\n",
    ));
    assert!(message.contains("at least one sink"));
}

#[test]
fn test_duplicate_sink_names_are_rejected() {
    let yaml = r#"
sinks:
  tcp:
    - name: riemann
      address: localhost:5555
  udp:
    - name: riemann
      address: localhost:5555
"#;
    let message = validation_message(AppConfig::from_yaml_str(yaml));
    assert!(message.contains("duplicate sink name"));
}

#[test]
fn test_invalid_sink_url_is_rejected() {
    let yaml = r#"
sinks:
  http:
    - name: influx
      url: not a url
"#;
    assert!(validation_message(AppConfig::from_yaml_str(yaml)).contains("influx"));
}

#[test]
fn test_invalid_socket_address_is_rejected() {
    let yaml = r#"
sinks:
  udp:
    - name: riemann-udp
      address: localhost
"#;
    assert!(validation_message(AppConfig::from_yaml_str(yaml)).contains("riemann-udp"));
}

#[test]
fn test_self_report_name_is_reserved() {
    let yaml = format!("collectors:\n  host:\n    - name: self_report\n{MINIMAL_SINKS}");
    assert!(validation_message(AppConfig::from_yaml_str(&yaml)).contains("reserved"));

    // Reserved even with the self-report turned off.
    let yaml = format!(
        "agent:\n  self_report_interval: 0s\n\
         collectors:\n  gpu:\n    - name: self_report\n{MINIMAL_SINKS}"
    );
    assert!(validation_message(AppConfig::from_yaml_str(&yaml)).contains("reserved"));
}

#[test]
fn test_bad_cron_is_rejected() {
    let yaml = format!(
        "collectors:\n  gpu:\n    - name: gpu\n      cron: \"every tuesday\"\n{MINIMAL_SINKS}"
    );
    assert!(validation_message(AppConfig::from_yaml_str(&yaml)).contains("invalid cron"));
}

#[test]
fn test_interval_and_cron_conflict_is_rejected() {
    let yaml = format!(
        "collectors:\n  container:\n    - name: docker\n      interval: 30s\n\
         \x20     cron: \"0 * * * * *\"\n{MINIMAL_SINKS}"
    );
    assert!(
        validation_message(AppConfig::from_yaml_str(&yaml))
            .contains("cannot specify both interval and cron")
    );
}

#[test]
fn test_zero_pipeline_values_are_rejected() {
    let yaml = format!("pipeline:\n  max_attempts: 0\n{MINIMAL_SINKS}");
    assert!(validation_message(AppConfig::from_yaml_str(&yaml)).contains("max_attempts"));

    let yaml = format!("pipeline:\n  breaker: {{ failure_threshold: 0 }}\n{MINIMAL_SINKS}");
    assert!(validation_message(AppConfig::from_yaml_str(&yaml)).contains("failure_threshold"));
}
