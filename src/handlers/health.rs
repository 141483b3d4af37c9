//! Health check endpoint handler.
//!
//! This module provides the `/health` endpoint handler that returns
//! fetch loop statistics. The status code follows the most recent cycle:
//! 200 once a cycle has completed, 503 before the first cycle finishes or
//! after an aborted one.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use pipeline_monitor_exporter::cycle_stats::LastCycle;
use tracing::{debug, instrument};

use crate::state::SharedState;

// Time conversion constants
const SECONDS_PER_HOUR: f64 = 3600.0;
const MINUTES_PER_HOUR: f64 = 60.0;
const HOURS_PER_DAY: f64 = 24.0;

/// Footer text for human-readable HTTP endpoints.
pub const FOOTER_TEXT: &str = concat!("pipeline-monitor-exporter ", env!("CARGO_PKG_VERSION"));

/// Formats an uptime in the largest fitting unit.
pub fn format_uptime(uptime_seconds: u64) -> String {
    let uptime_hours = uptime_seconds as f64 / SECONDS_PER_HOUR;
    if uptime_hours < 1.0 {
        format!("{:.1} minutes", uptime_hours * MINUTES_PER_HOUR)
    } else if uptime_hours < HOURS_PER_DAY {
        format!("{:.1} hours", uptime_hours)
    } else {
        format!("{:.1} days", uptime_hours / HOURS_PER_DAY)
    }
}

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");
    state.stats.record_http_request();

    let in_progress = state.gauges.telemetry.fetch_in_progress.get() > 0.0;

    let (status, message) = match state.stats.last_cycle() {
        Some(LastCycle::Completed { .. }) if in_progress => (StatusCode::OK, "OK - Fetch running"),
        Some(LastCycle::Completed { .. }) => (StatusCode::OK, "OK"),
        Some(LastCycle::Aborted { .. }) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Last fetch cycle aborted")
        }
        None if in_progress => (StatusCode::SERVICE_UNAVAILABLE, "Initial fetch running"),
        None => (StatusCode::SERVICE_UNAVAILABLE, "No fetch cycle yet"),
    };

    let uptime_str = format_uptime(state.stats.get_uptime_seconds());
    let table = state.stats.render_table();

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!("{message}\n\nUptime: {uptime_str}\n\n{table}\n{FOOTER_TEXT}\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime_units() {
        assert_eq!(format_uptime(90), "1.5 minutes");
        assert_eq!(format_uptime(2 * 3600), "2.0 hours");
        assert_eq!(format_uptime(36 * 3600), "1.5 days");
    }
}
