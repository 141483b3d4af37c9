//! Application state management for the exporter.
//!
//! This module defines the shared application state that is passed
//! to HTTP handlers and used by the background fetch task.

use pipeline_monitor_exporter::{Config, CycleStats, GaugeRegistry};
use prometheus::Gauge;
use std::sync::Arc;
use std::time::Instant;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Global application state shared across requests and background tasks.
pub struct AppState {
    /// Pipeline series and fetch telemetry
    pub gauges: Arc<GaugeRegistry>,
    /// Time spent encoding the last scrape response
    pub scrape_duration: Gauge,
    /// Fetch loop statistics and the monitored target snapshot
    pub stats: Arc<CycleStats>,
    pub config: Arc<Config>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}
