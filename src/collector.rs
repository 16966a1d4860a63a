//! Collector Layer
//!
//! Pluggable collectors polled on independent schedules. Each collector runs
//! in its own Tokio task owned by the [`Scheduler`], which hands every batch
//! to the delivery pipeline.
//!
//! # Architecture
//!
//! - [`Collector`]: Core trait for implementing data collectors
//! - [`Schedule`]: Execution schedule (interval or cron)
//! - [`Scheduler`]: Runs collectors and handles graceful shutdown
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use vigil::collector::{HostCollector, HostConfig, Scheduler};
//! use vigil::encoder::LineProtocolEncoder;
//! use vigil::pipeline::{DeliveryPipeline, PipelineConfig};
//! use vigil::sink::{HttpSink, HttpSinkConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let sink = HttpSink::new(&HttpSinkConfig::new("influx", "http://localhost:8086/write"))?;
//! let pipeline = DeliveryPipeline::builder(PipelineConfig::default())
//!     .sink(Arc::new(sink), Arc::new(LineProtocolEncoder))
//!     .build()?;
//!
//! let mut scheduler = Scheduler::new(pipeline.handle());
//! let config = HostConfig::new("host").with_interval(Duration::from_secs(30));
//! scheduler.spawn(Arc::new(HostCollector::new(config)?))?;
//!
//! tokio::signal::ctrl_c().await?;
//! scheduler.shutdown().await;
//! pipeline.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod command;
pub mod container;
pub mod gpu;
pub mod host;
mod scheduler;
pub mod self_report;
pub mod service;
mod traits;

pub use container::{ContainerCollector, ContainerConfig};
pub use gpu::{GpuCollector, GpuConfig};
pub use host::{HostCollector, HostConfig, HostProbe, HostSnapshot, SysinfoProbe};
pub use scheduler::{DEFAULT_ERROR_DELAY, DEFAULT_SHUTDOWN_TIMEOUT, JobInfo, Scheduler};
pub use self_report::SelfReportCollector;
pub use service::{Probe, ServiceCollector, ServiceConfig};
pub use traits::{
    CollectError, CollectErrorKind, Collector, CollectorKind, MIN_INTERVAL, Schedule, Tick,
};
