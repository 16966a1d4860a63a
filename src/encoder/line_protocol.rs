//! InfluxDB-style line protocol.
//!
//! ```text
//! <name>[,<key>=<value>...] value=<float> <timestamp-ns>
//! ```
//!
//! Names and tag keys are sanitized; tag values escape `,`, `=`, space and
//! backslash with a backslash. Line breaks inside a value become an escaped
//! space so one sample always stays one line. The state is not carried.

use std::fmt::Write as _;

use thiserror::Error;

use super::{Encoder, EncoderKind, sanitize};
use crate::sample::{Batch, Sample, State};

/// Line protocol encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineProtocolEncoder;

impl LineProtocolEncoder {
    /// Encode one sample without the trailing newline.
    ///
    /// Returns `None` for non-finite values.
    pub fn encode_sample(sample: &Sample) -> Option<String> {
        if !sample.value().is_finite() {
            return None;
        }

        let mut line = sanitize(sample.name());
        for (key, value) in sample.tags() {
            if value.is_empty() {
                continue;
            }
            line.push(',');
            line.push_str(&sanitize(key));
            line.push('=');
            escape_into(&mut line, value);
        }
        let _ = write!(line, " value={} {}", sample.value(), sample.timestamp());
        Some(line)
    }
}

impl Encoder for LineProtocolEncoder {
    fn kind(&self) -> EncoderKind {
        EncoderKind::LineProtocol
    }

    fn encode(&self, batch: &Batch) -> Vec<u8> {
        let mut out = String::new();
        for line in batch.iter().filter_map(Self::encode_sample) {
            out.push_str(&line);
            out.push('\n');
        }
        out.into_bytes()
    }
}

fn escape_into(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            ',' | '=' | ' ' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\n' | '\r' => out.push_str("\\ "),
            _ => out.push(c),
        }
    }
}

/// Errors from [`decode_line`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("expected '<series> value=<float> <timestamp>', got {0} field(s)")]
    FieldCount(usize),

    #[error("malformed tag '{0}'")]
    Tag(String),

    #[error("expected 'value=<float>', got '{0}'")]
    Value(String),

    #[error("invalid timestamp '{0}'")]
    Timestamp(String),
}

/// Parse one encoded line back into a sample.
///
/// The state is not part of the format and decodes as [`State::Unknown`].
pub fn decode_line(line: &str) -> Result<Sample, DecodeError> {
    let line = line.trim_end_matches(['\n', '\r']);
    let fields = split_unescaped(line, ' ');
    let [series, field, timestamp] = fields.as_slice() else {
        return Err(DecodeError::FieldCount(fields.len()));
    };

    let value = field
        .strip_prefix("value=")
        .and_then(|v| v.parse::<f64>().ok())
        .ok_or_else(|| DecodeError::Value(field.to_string()))?;
    let timestamp = timestamp
        .parse::<i64>()
        .map_err(|_| DecodeError::Timestamp(timestamp.to_string()))?;

    let mut parts = split_unescaped(series, ',').into_iter();
    let name = parts.next().map(|n| unescape(&n)).unwrap_or_default();
    let mut sample = Sample::new(name, value, timestamp).with_state(State::Unknown);

    for tag in parts {
        let kv = split_unescaped(&tag, '=');
        let [key, value] = kv.as_slice() else {
            return Err(DecodeError::Tag(tag));
        };
        if key.is_empty() {
            return Err(DecodeError::Tag(tag));
        }
        sample = sample.with_tag(unescape(key), unescape(value));
    }

    Ok(sample)
}

/// Split on `sep` unless it is preceded by a backslash. Escapes are kept.
fn split_unescaped(input: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            current.push(c);
            if let Some(next) = chars.next() {
                current.push(next);
            }
        } else if c == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

/// Drop the backslash in front of `,`, `=`, space and backslash. Other
/// backslashes are literal.
fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, ',' | '=' | ' ' | '\\') {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}
