//! Monitoring Module
//!
//! Side signals for external monitoring.
//!
//! # Components
//!
//! - [`ResourceMonitor`]: CPU and memory sampling
//! - [`MetricsAggregator`]: Per-execution counters, alerts and health

pub mod metrics;
pub mod resource;

pub use metrics::{AggregateTotals, Alert, AlertKind, HealthStatus, MetricsAggregator};
pub use resource::{ResourceMonitor, ResourceSample};
