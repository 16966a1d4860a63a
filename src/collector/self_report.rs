//! Pipeline self-report collector.
//!
//! Turns the delivery counters into samples so drops and evictions reach the
//! same backends as every other metric.

use std::time::Duration;

use crate::collector::{CollectError, Collector, CollectorKind, Schedule, Tick};
use crate::pipeline::PipelineHandle;
use crate::sample::{Batch, Sample, State};

/// Default report interval (60 seconds).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Collector name; reserved so configured collectors cannot take it.
pub const NAME: &str = "self_report";

#[derive(Debug)]
pub struct SelfReportCollector {
    pipeline: PipelineHandle,
    schedule: Schedule,
}

impl SelfReportCollector {
    pub fn new(pipeline: PipelineHandle, interval: Duration) -> Self {
        Self {
            pipeline,
            schedule: Schedule::interval(interval),
        }
    }
}

#[async_trait::async_trait]
impl Collector for SelfReportCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> CollectorKind {
        CollectorKind::SelfReport
    }

    fn schedule(&self) -> Schedule {
        self.schedule.clone()
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn poll(&self, tick: &Tick) -> Result<Batch, CollectError> {
        let ts = tick.timestamp();
        let snapshot = self.pipeline.snapshot();
        let mut batch = Batch::new();

        for sink in &snapshot.sinks {
            let sample = |name: &str, value: u64| {
                Sample::new(name, value as f64, ts).with_tag("sink", &sink.sink)
            };
            batch.push(sample("pipeline.delivered", sink.delivered));
            batch.push(sample("pipeline.drops", sink.drops()));
            batch.push(sample("pipeline.drops.exhausted", sink.dropped_exhausted));
            batch.push(sample("pipeline.drops.circuit_open", sink.dropped_circuit_open));
            batch.push(sample("pipeline.evictions", sink.evictions));
            batch.push(sample("pipeline.queue_depth", sink.queue_depth));
            let circuit = if sink.circuit_open {
                State::Critical
            } else {
                State::Ok
            };
            let open = sample("pipeline.circuit_open", u64::from(sink.circuit_open));
            batch.push(open.with_state(circuit));
        }
        batch.push(Sample::new(
            "pipeline.collect_errors",
            snapshot.collect_errors as f64,
            ts,
        ));

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::TextEncoder;
    use crate::pipeline::{DeliveryPipeline, PipelineConfig};
    use crate::sink::{Sink, SinkError, SinkKind};
    use std::sync::Arc;

    struct NullSink;

    #[async_trait::async_trait]
    impl Sink for NullSink {
        fn name(&self) -> &str {
            "null"
        }

        fn kind(&self) -> SinkKind {
            SinkKind::Udp
        }

        async fn send(&self, _payload: &[u8]) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reports_counters_per_sink() {
        let pipeline = DeliveryPipeline::builder(PipelineConfig::default())
            .sink(Arc::new(NullSink), Arc::new(TextEncoder))
            .build()
            .unwrap();
        let handle = pipeline.handle();
        handle.record_collect_error();
        handle.record_collect_error();

        let collector = SelfReportCollector::new(handle, DEFAULT_INTERVAL);
        assert_eq!(collector.kind(), CollectorKind::SelfReport);
        let batch = collector.poll(&Tick::new(0, 9)).await.unwrap();

        let errors = batch
            .iter()
            .find(|s| s.name() == "pipeline.collect_errors")
            .unwrap();
        assert_eq!(errors.value(), 2.0);

        let circuit = batch
            .iter()
            .find(|s| s.name() == "pipeline.circuit_open")
            .unwrap();
        assert_eq!(circuit.tag("sink"), Some("null"));
        assert_eq!(circuit.value(), 0.0);
        assert_eq!(circuit.state(), State::Ok);

        pipeline.shutdown().await;
    }
}
