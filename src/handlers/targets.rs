//! Monitored targets endpoint handler.
//!
//! Lists the working set from the last discovery. Reads a snapshot kept in
//! the cycle statistics, so it answers while a fetch cycle is running.

use axum::extract::State;
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the /targets endpoint.
#[instrument(skip(state))]
pub async fn targets_handler(State(state): State<SharedState>) -> String {
    debug!("Processing /targets request");
    state.stats.record_http_request();

    let targets = state.stats.monitored_targets();

    let mut out = String::new();
    writeln!(out, "MONITORED TARGETS").ok();
    writeln!(out, "=================").ok();
    writeln!(out).ok();
    if targets.is_empty() {
        writeln!(out, "No targets discovered yet").ok();
        return out;
    }
    writeln!(out, "{:<30} {:<30}", "TYPE", "REVISION").ok();
    writeln!(out, "{}", "-".repeat(61)).ok();
    for target in &targets {
        writeln!(out, "{:<30} {:<30}", target.type_name, target.revision).ok();
    }
    writeln!(out).ok();
    writeln!(out, "Total: {}", targets.len()).ok();
    out
}
