//! HTTP endpoint handlers for the exporter.
//!
//! This module provides handlers for all HTTP endpoints:
//! - `/`: Landing page listing the endpoints
//! - `<metrics_path>`: Prometheus metrics endpoint
//! - `/health`: Fetch loop health check endpoint
//! - `/config`: Configuration display endpoint
//! - `/targets`: Monitored type:revision pairs

pub mod config;
pub mod health;
pub mod metrics;
pub mod root;
pub mod targets;

// Re-export handlers
pub use config::config_handler;
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use root::root_handler;
pub use targets::targets_handler;
