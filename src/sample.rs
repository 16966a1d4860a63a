//! Core data types shared by collectors, encoders and the pipeline.
//!
//! - [`Sample`]: one timestamped, tagged numeric observation with a [`State`]
//! - [`Batch`]: the samples produced by a single collector tick
//! - [`classify`]: disk usage threshold policy

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Static or dynamic tags attached to a sample. Keys are unique.
pub type Tags = BTreeMap<String, String>;

/// Usage fraction at or above which a resource is reported as warning.
pub const WARNING_THRESHOLD: f64 = 0.80;

/// Usage fraction at or above which a resource is reported as critical.
pub const CRITICAL_THRESHOLD: f64 = 0.90;

/// Qualitative state of a sample.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum State {
    #[default]
    Ok,
    Warning,
    Critical,
    Unknown,
}

/// Classify a usage fraction against the shared thresholds.
///
/// `>= 0.90` is critical, `>= 0.80` is warning, anything else is ok.
/// A NaN usage cannot be classified and yields [`State::Unknown`].
pub fn classify(usage: f64) -> State {
    if usage.is_nan() {
        State::Unknown
    } else if usage >= CRITICAL_THRESHOLD {
        State::Critical
    } else if usage >= WARNING_THRESHOLD {
        State::Warning
    } else {
        State::Ok
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// A single observation.
///
/// Samples are assembled with the `with_*` builders inside a collector and are
/// not mutated after they have been pushed into a [`Batch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    name: String,
    tags: Tags,
    value: f64,
    timestamp: i64,
    state: State,
}

impl Sample {
    /// Create a sample in the `ok` state with no tags.
    pub fn new(name: impl Into<String>, value: f64, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            tags: Tags::new(),
            value,
            timestamp,
            state: State::Ok,
        }
    }

    /// Sentinel sample signalling that a collection step failed.
    pub fn sentinel(name: impl Into<String>, count: f64, timestamp: i64) -> Self {
        Self::new(name, count, timestamp).with_state(State::Critical)
    }

    /// Set the state.
    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    /// Add a single tag, replacing any previous value for the key.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add all tags, replacing previous values for the same keys.
    pub fn with_tags(mut self, tags: &Tags) -> Self {
        for (key, value) in tags {
            self.tags.insert(key.clone(), value.clone());
        }
        self
    }

    /// Add tags only for keys the sample does not carry yet.
    pub fn with_default_tags(mut self, tags: &Tags) -> Self {
        for (key, value) in tags {
            self.tags
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Timestamp in nanoseconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn state(&self) -> State {
        self.state
    }
}

/// Samples produced by one collector tick, in collection order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    samples: Vec<Sample>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

impl From<Vec<Sample>> for Batch {
    fn from(samples: Vec<Sample>) -> Self {
        Self { samples }
    }
}

impl FromIterator<Sample> for Batch {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }
}

impl Extend<Sample> for Batch {
    fn extend<I: IntoIterator<Item = Sample>>(&mut self, iter: I) {
        self.samples.extend(iter);
    }
}

impl IntoIterator for Batch {
    type Item = Sample;
    type IntoIter = std::vec::IntoIter<Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(0.79), State::Ok);
        assert_eq!(classify(0.80), State::Warning);
        assert_eq!(classify(0.899), State::Warning);
        assert_eq!(classify(0.90), State::Critical);
        assert_eq!(classify(1.0), State::Critical);
        assert_eq!(classify(0.0), State::Ok);
    }

    #[test]
    fn test_classify_monotonic() {
        fn rank(state: State) -> u8 {
            match state {
                State::Ok => 0,
                State::Warning => 1,
                State::Critical => 2,
                State::Unknown => u8::MAX,
            }
        }

        let mut previous = rank(classify(0.0));
        for step in 0..=1000 {
            let current = rank(classify(f64::from(step) / 1000.0));
            assert!(current >= previous, "classify regressed at step {step}");
            previous = current;
        }
    }

    #[test]
    fn test_classify_nan() {
        assert_eq!(classify(f64::NAN), State::Unknown);
    }

    #[test]
    fn test_state_from_str() {
        assert_eq!(State::from_str("ok").unwrap(), State::Ok);
        assert_eq!(State::from_str("WARNING").unwrap(), State::Warning);
        assert_eq!(State::from_str("Critical").unwrap(), State::Critical);
        assert!(State::from_str("down").is_err());
        assert_eq!(State::Unknown.as_ref(), "unknown");
    }

    #[test]
    fn test_default_tags_do_not_override() {
        let mut defaults = Tags::new();
        defaults.insert("host".to_string(), "agent".to_string());
        defaults.insert("env".to_string(), "prod".to_string());

        let sample = Sample::new("cpu", 0.5, 1)
            .with_tag("host", "db-1")
            .with_default_tags(&defaults);

        assert_eq!(sample.tag("host"), Some("db-1"));
        assert_eq!(sample.tag("env"), Some("prod"));
    }

    #[test]
    fn test_sentinel_is_critical() {
        let sample = Sample::sentinel("disk.error", 1.0, 42);
        assert_eq!(sample.state(), State::Critical);
        assert_eq!(sample.value(), 1.0);
        assert_eq!(sample.timestamp(), 42);
    }

    #[test]
    fn test_batch_collects_in_order() {
        let batch: Batch = (0..3)
            .map(|i| Sample::new(format!("m{i}"), f64::from(i), 7))
            .collect();

        let names: Vec<_> = batch.iter().map(Sample::name).collect();
        assert_eq!(names, vec!["m0", "m1", "m2"]);
        assert_eq!(batch.len(), 3);
    }
}
