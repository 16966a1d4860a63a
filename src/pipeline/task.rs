//! Unit of work flowing through a sink lane.

use std::sync::Arc;

use tokio::time::Instant;

use crate::encoder::EncoderKind;
use crate::sample::Batch;

/// One batch addressed to one sink.
///
/// The batch is shared between the tasks created for every configured sink.
#[derive(Debug, Clone)]
pub struct DeliveryTask {
    pub id: u64,
    pub batch: Arc<Batch>,
    pub encoder_kind: EncoderKind,
    pub sink_target: String,
    pub attempt_count: u32,
    pub created_at: Instant,
}

impl DeliveryTask {
    pub fn new(
        id: u64,
        batch: Arc<Batch>,
        encoder_kind: EncoderKind,
        sink_target: impl Into<String>,
    ) -> Self {
        Self {
            id,
            batch,
            encoder_kind,
            sink_target: sink_target.into(),
            attempt_count: 0,
            created_at: Instant::now(),
        }
    }
}
