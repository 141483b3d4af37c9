//! Root endpoint handler for the landing page.

use axum::extract::State;
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::handlers::health::FOOTER_TEXT;
use crate::state::SharedState;

/// Handler for the root `/` endpoint.
#[instrument(skip(state))]
pub async fn root_handler(State(state): State<SharedState>) -> String {
    debug!("Processing / request");
    state.stats.record_http_request();

    let uptime_secs = state.start_time.elapsed().as_secs();
    let hours = uptime_secs / 3600;
    let minutes = (uptime_secs % 3600) / 60;
    let seconds = uptime_secs % 60;

    let mut out = String::new();
    writeln!(out, "PIPELINE MONITOR EXPORTER").ok();
    writeln!(out, "=========================").ok();
    writeln!(out).ok();
    writeln!(out, "Version: {}", env!("CARGO_PKG_VERSION")).ok();
    writeln!(out, "Uptime:  {}h {}m {}s", hours, minutes, seconds).ok();
    writeln!(
        out,
        "Fetch:   every {} minutes",
        state.config.frequency_minutes()
    )
    .ok();
    writeln!(out).ok();
    writeln!(out, "Endpoints:").ok();
    writeln!(
        out,
        "  {:<20} Prometheus metrics",
        state.config.metrics_path()
    )
    .ok();
    if state.config.enable_health.unwrap_or(true) {
        writeln!(out, "  {:<20} Fetch loop health and statistics", "/health").ok();
    }
    writeln!(out, "  {:<20} Active configuration (read-only)", "/config").ok();
    writeln!(out, "  {:<20} Monitored type:revision pairs", "/targets").ok();
    writeln!(out).ok();
    writeln!(out, "{FOOTER_TEXT}").ok();
    out
}
