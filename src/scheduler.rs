//! Periodic fetch scheduling.
//!
//! A tokio interval fires once per configured period, starting immediately.
//! Each tick hands a cycle to the blocking pool; a tick that arrives while
//! the previous cycle is still running is skipped by [`FetchLoop::tick`].
//! On shutdown no new cycles are started; a cycle already executing runs to
//! completion.

use pipeline_monitor_exporter::{CycleOutcome, FetchLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Runs the fetch schedule until `shutdown` flips to `true`.
pub async fn run_scheduler(
    fetch_loop: Arc<FetchLoop>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Fetch scheduler started, running every {:.0} minutes",
        period.as_secs_f64() / 60.0
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let fetch_loop = fetch_loop.clone();
                let next_in = period;
                tokio::spawn(async move {
                    match tokio::task::spawn_blocking(move || fetch_loop.tick()).await {
                        Ok(CycleOutcome::Skipped) => {
                            warn!("Previous fetch cycle still running, tick skipped");
                        }
                        Ok(outcome) => {
                            debug!(
                                "Fetch cycle {}. Next run in {} minutes.",
                                outcome.label(),
                                next_in.as_secs() / 60
                            );
                        }
                        Err(e) => error!("Fetch cycle task failed: {}", e),
                    }
                });
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Fetch scheduler stopping, no further cycles will start");
                    break;
                }
            }
        }
    }
}
