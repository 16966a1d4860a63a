//! Event-stream encoders for Riemann-style listeners.

use std::time::Duration;

use serde::Serialize;

use super::{Encoder, EncoderKind, sanitize};
use crate::sample::{Batch, Sample, State, Tags};

/// Default event time-to-live (120 seconds).
pub const DEFAULT_TTL: Duration = Duration::from_secs(120);

/// Host reported for samples without a `host` tag.
const UNKNOWN_HOST: &str = "unknown";

const NANOS_PER_SEC: i64 = 1_000_000_000;

#[derive(Debug, Serialize)]
struct Event<'a> {
    host: &'a str,
    service: String,
    metric: f64,
    state: State,
    time: i64,
    ttl: u64,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    attributes: Tags,
}

fn host_of(sample: &Sample) -> &str {
    sample.tag("host").unwrap_or(UNKNOWN_HOST)
}

/// One JSON event per line.
///
/// `host` comes from the sample's `host` tag; every other tag is an attribute.
#[derive(Debug, Clone, Copy)]
pub struct EventEncoder {
    ttl: Duration,
}

impl EventEncoder {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for EventEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl Encoder for EventEncoder {
    fn kind(&self) -> EncoderKind {
        EncoderKind::Event
    }

    fn encode(&self, batch: &Batch) -> Vec<u8> {
        let mut out = Vec::new();

        for sample in batch.iter().filter(|s| s.value().is_finite()) {
            let attributes = sample
                .tags()
                .iter()
                .filter(|(k, _)| k.as_str() != "host")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let event = Event {
                host: host_of(sample),
                service: sanitize(sample.name()),
                metric: sample.value(),
                state: sample.state(),
                time: sample.timestamp().div_euclid(NANOS_PER_SEC),
                ttl: self.ttl.as_secs(),
                attributes,
            };
            // Serializing plain strings and finite numbers cannot fail.
            if serde_json::to_writer(&mut out, &event).is_ok() {
                out.push(b'\n');
            }
        }

        out
    }
}

/// `<host> <service> <metric> <state>` per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextEncoder;

impl Encoder for TextEncoder {
    fn kind(&self) -> EncoderKind {
        EncoderKind::Text
    }

    fn encode(&self, batch: &Batch) -> Vec<u8> {
        let mut out = String::new();
        for sample in batch.iter().filter(|s| s.value().is_finite()) {
            out.push_str(&sanitize(host_of(sample)));
            out.push(' ');
            out.push_str(&sanitize(sample.name()));
            out.push(' ');
            out.push_str(&sample.value().to_string());
            out.push(' ');
            out.push_str(sample.state().as_ref());
            out.push('\n');
        }
        out.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> Batch {
        Batch::from(vec![
            Sample::new("disk.usage", 0.93, 1_700_000_000_500_000_000)
                .with_tag("host", "trust")
                .with_tag("mount", "/")
                .with_state(State::Critical),
            Sample::new("cpu", 0.25, 1_700_000_001_000_000_000),
            Sample::new("broken", f64::NAN, 0),
        ])
    }

    #[test]
    fn test_event_encoding() {
        let payload = EventEncoder::default().encode(&batch());
        let text = String::from_utf8(payload).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["host"], "trust");
        assert_eq!(first["service"], "disk.usage");
        assert_eq!(first["metric"], 0.93);
        assert_eq!(first["state"], "critical");
        assert_eq!(first["time"], 1_700_000_000);
        assert_eq!(first["ttl"], 120);
        assert_eq!(first["attributes"]["mount"], "/");
        assert!(first["attributes"].get("host").is_none());

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["host"], "unknown");
        assert_eq!(second["state"], "ok");
        assert!(second.get("attributes").is_none());
    }

    #[test]
    fn test_event_ttl() {
        let payload = EventEncoder::new(Duration::from_secs(60)).encode(&batch());
        let first: serde_json::Value =
            serde_json::from_slice(payload.split(|b| *b == b'\n').next().unwrap()).unwrap();
        assert_eq!(first["ttl"], 60);
    }

    #[test]
    fn test_text_encoding() {
        let text = String::from_utf8(TextEncoder.encode(&batch())).unwrap();
        assert_eq!(text, "trust disk.usage 0.93 critical\nunknown cpu 0.25 ok\n");
    }
}
