//! Vigil - Metrics Collection Agent
//!
//! This crate provides the core functionality for the vigil agent. It can be
//! used as a library by other Rust projects, or run as a standalone binary
//! with the `vigil` executable.
//!
//! # Architecture
//!
//! - **Collectors**: Host resources, service health, containers and GPUs,
//!   each polled on its own schedule
//! - **Encoders**: Line protocol, JSON events and plain text
//! - **Sinks**: HTTP write endpoints, TCP and UDP listeners
//! - **Delivery pipeline**: Per-sink bounded queues with retry, backoff and
//!   circuit breaking
//!
//! # Example
//!
//! ```rust,no_run
//! use vigil::collector::Scheduler;
//! use vigil::config::AppConfig;
//! use vigil::pipeline::DeliveryPipeline;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load("configs/vigil.yaml")?;
//!
//! let mut builder = DeliveryPipeline::builder(config.pipeline.clone());
//! for (sink, encoder) in config.sinks.build()? {
//!     builder = builder.sink(sink, encoder);
//! }
//! let pipeline = builder.build()?;
//!
//! let mut scheduler =
//!     Scheduler::new(pipeline.handle()).with_global_tags(config.agent.global_tags());
//! for collector in config.collectors.build()? {
//!     scheduler.spawn(collector)?;
//! }
//!
//! tokio::signal::ctrl_c().await?;
//! scheduler.shutdown().await;
//! let snapshot = pipeline.shutdown().await;
//! println!("delivered {}", snapshot.delivered());
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod encoder;
pub mod pipeline;
pub mod sample;
pub mod sink;

pub use collector::{CollectError, CollectErrorKind, Collector, CollectorKind, Schedule, Scheduler};
pub use config::{AppConfig, ConfigError};
pub use encoder::{Encoder, EncoderKind};
pub use pipeline::{DeliveryPipeline, PipelineError, PipelineHandle, PipelineSnapshot};
pub use sample::{Batch, Sample, State, Tags, classify};
pub use sink::{Sink, SinkError, SinkKind};
