//! Right-sizing library for Cloud Foundry web processes
//!
//! This crate provides the core functionality for:
//! - Inventory and usage telemetry from the CF v3 API
//! - Sizing decisions for memory and disk allocations
//! - Sequenced scale and restart actions
//! - Run totals, structured logging and Prometheus metrics

pub mod config;
pub mod error;
pub mod models;
pub mod observability;
pub mod platform;
pub mod policy;
pub mod sampler;
pub mod scan;
pub mod sequencer;

#[cfg(test)]
mod testing;

pub use config::{ApiSettings, RawSettings, RunConfig, Settings};
pub use error::{PlatformError, TrimError, TrimResult};
pub use models::*;
pub use observability::{RunMetrics, StructuredLogger};
pub use platform::{PlatformApi, SessionRefresher};
pub use scan::{ReportSink, RunTotals, ScanReport, Scanner, StdoutSink};
