//! Metrics endpoint handler for Prometheus scraping.
//!
//! Serving a scrape only encodes whatever the last fetch cycles left in the
//! registry. It never runs commands on the target, so scrapes stay cheap and
//! never block on a cycle in progress.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::time::Instant;
use tracing::{debug, error, instrument};

use crate::state::SharedState;

/// Error type for metrics endpoint failures.
#[derive(Debug)]
pub enum MetricsError {
    EncodingFailed,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> axum::response::Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response()
    }
}

/// Handler for the metrics endpoint.
#[instrument(skip(state))]
pub async fn metrics_handler(State(state): State<SharedState>) -> Result<String, MetricsError> {
    let start = Instant::now();
    debug!("Processing metrics request");
    state.stats.record_http_request();

    let body = state.gauges.encode().map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        MetricsError::EncodingFailed
    })?;

    // Exposed on the next scrape
    let elapsed = start.elapsed().as_secs_f64();
    state.scrape_duration.set(elapsed);
    debug!(
        "Encoded {} pipeline series in {:.4}s",
        state.gauges.series_count(),
        elapsed
    );

    Ok(body)
}
