//! Fetch cycle statistics for the health endpoint.
//!
//! Counters are updated by the orchestrator and read by HTTP handlers, so
//! everything here is safe to share across threads.

use chrono::{DateTime, Utc};
use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::selector::MonitorTarget;

/// Running statistics for a single metric.
#[derive(Clone, Copy, Default)]
pub struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.last = value;
            self.sum = value;
            self.count = 1;
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

/// Thread-safe wrapper for running statistics.
#[derive(Default)]
pub struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    pub fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    /// (last, avg, max, min, count)
    pub fn snapshot(&self) -> (f64, f64, f64, f64, u64) {
        if let Ok(s) = self.inner.lock() {
            (s.last, s.avg(), s.max, s.min, s.count)
        } else {
            (0.0, 0.0, 0.0, 0.0, 0)
        }
    }
}

/// How the most recent cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastCycle {
    Completed { at: DateTime<Utc> },
    Aborted { at: DateTime<Utc>, reason: String },
}

/// Fetch loop statistics.
pub struct CycleStats {
    pub cycle_duration_seconds: Stat,
    pub targets_per_cycle: Stat,
    pub completed_cycles: AtomicU64,
    pub aborted_cycles: AtomicU64,
    pub skipped_cycles: AtomicU64,
    pub empty_results: AtomicU64,
    pub routed_samples: AtomicU64,
    pub http_requests: AtomicU64,
    last_cycle: Mutex<Option<LastCycle>>,
    last_success: Mutex<Option<DateTime<Utc>>>,
    monitored: Mutex<Vec<MonitorTarget>>,
    start_time: Instant,
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleStats {
    pub fn new() -> Self {
        Self {
            cycle_duration_seconds: Stat::default(),
            targets_per_cycle: Stat::default(),
            completed_cycles: AtomicU64::new(0),
            aborted_cycles: AtomicU64::new(0),
            skipped_cycles: AtomicU64::new(0),
            empty_results: AtomicU64::new(0),
            routed_samples: AtomicU64::new(0),
            http_requests: AtomicU64::new(0),
            last_cycle: Mutex::new(None),
            last_success: Mutex::new(None),
            monitored: Mutex::new(Vec::new()),
            start_time: Instant::now(),
        }
    }

    pub fn record_completed(&self, duration_secs: f64, targets: usize) {
        self.completed_cycles.fetch_add(1, Ordering::Relaxed);
        self.cycle_duration_seconds.add_sample(duration_secs);
        self.targets_per_cycle.add_sample(targets as f64);
        let now = Utc::now();
        if let Ok(mut last) = self.last_cycle.lock() {
            *last = Some(LastCycle::Completed { at: now });
        }
        if let Ok(mut success) = self.last_success.lock() {
            *success = Some(now);
        }
    }

    pub fn record_aborted(&self, duration_secs: f64, reason: &str) {
        self.aborted_cycles.fetch_add(1, Ordering::Relaxed);
        self.cycle_duration_seconds.add_sample(duration_secs);
        if let Ok(mut last) = self.last_cycle.lock() {
            *last = Some(LastCycle::Aborted {
                at: Utc::now(),
                reason: reason.to_string(),
            });
        }
    }

    pub fn record_skipped(&self) {
        self.skipped_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty_result(&self) {
        self.empty_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_routed(&self, samples: usize) {
        self.routed_samples
            .fetch_add(samples as u64, Ordering::Relaxed);
    }

    /// Snapshot of the working set, readable without waiting on a cycle.
    pub fn record_targets(&self, targets: &[MonitorTarget]) {
        if let Ok(mut monitored) = self.monitored.lock() {
            *monitored = targets.to_vec();
        }
    }

    pub fn monitored_targets(&self) -> Vec<MonitorTarget> {
        self.monitored
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn record_http_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_cycle(&self) -> Option<LastCycle> {
        self.last_cycle.lock().ok().and_then(|l| l.clone())
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success.lock().ok().and_then(|s| *s)
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Renders a plain-text table for the health endpoint.
    pub fn render_table(&self) -> String {
        let (cd_cur, cd_avg, cd_max, cd_min, _) = self.cycle_duration_seconds.snapshot();
        let (tg_cur, tg_avg, tg_max, tg_min, _) = self.targets_per_cycle.snapshot();

        let left_col = 26usize;
        let col_w = 12usize;

        let mut out = String::new();

        writeln!(out, "FETCH CYCLE STATISTICS").ok();
        writeln!(out, "======================").ok();
        writeln!(out).ok();
        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();
        writeln!(out, "{}", "-".repeat(left_col + 4 * (col_w + 3))).ok();
        writeln!(
            out,
            "{:left$} | {:>col$.3} | {:>col$.3} | {:>col$.3} | {:>col$.3}",
            "cycle_duration_seconds",
            cd_cur,
            cd_avg,
            cd_max,
            cd_min,
            left = left_col,
            col = col_w
        )
        .ok();
        writeln!(
            out,
            "{:left$} | {:>col$.0} | {:>col$.1} | {:>col$.0} | {:>col$.0}",
            "targets_per_cycle",
            tg_cur,
            tg_avg,
            tg_max,
            tg_min,
            left = left_col,
            col = col_w
        )
        .ok();
        writeln!(out).ok();

        let counters = [
            ("completed_cycles", &self.completed_cycles),
            ("aborted_cycles", &self.aborted_cycles),
            ("skipped_cycles", &self.skipped_cycles),
            ("empty_results", &self.empty_results),
            ("routed_samples", &self.routed_samples),
            ("http_requests", &self.http_requests),
        ];
        for (name, counter) in counters {
            writeln!(
                out,
                "{:left$} | {:>col$}",
                name,
                counter.load(Ordering::Relaxed),
                left = left_col,
                col = col_w
            )
            .ok();
        }
        writeln!(out).ok();

        let last = match self.last_cycle() {
            Some(LastCycle::Completed { at }) => format!("completed at {}", at.to_rfc3339()),
            Some(LastCycle::Aborted { at, reason }) => {
                format!("aborted at {} ({})", at.to_rfc3339(), reason)
            }
            None => "no cycle yet".to_string(),
        };
        writeln!(out, "Last cycle: {last}").ok();
        let success = self
            .last_success()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        writeln!(out, "Last successful cycle: {success}").ok();

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stat() {
        let mut stat = RunningStat::default();
        stat.add(2.0);
        stat.add(4.0);
        stat.add(0.0);
        assert_eq!(stat.count, 3);
        assert_eq!(stat.min, 0.0);
        assert_eq!(stat.max, 4.0);
        assert_eq!(stat.last, 0.0);
        assert!((stat.avg() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_aborted_keeps_last_success() {
        let stats = CycleStats::new();
        assert!(stats.last_cycle().is_none());

        stats.record_completed(1.5, 4);
        let success = stats.last_success().expect("success recorded");

        stats.record_aborted(0.2, "permission denied");
        assert!(matches!(
            stats.last_cycle(),
            Some(LastCycle::Aborted { ref reason, .. }) if reason == "permission denied"
        ));
        assert_eq!(stats.last_success(), Some(success));
        assert_eq!(stats.completed_cycles.load(Ordering::Relaxed), 1);
        assert_eq!(stats.aborted_cycles.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_render_table_mentions_counters() {
        let stats = CycleStats::new();
        stats.record_skipped();
        stats.record_empty_result();
        let table = stats.render_table();
        assert!(table.contains("skipped_cycles"));
        assert!(table.contains("empty_results"));
        assert!(table.contains("no cycle yet"));
    }
}
