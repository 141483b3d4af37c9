//! One polling cycle: refresh the monitor set if requested, fetch each
//! target's report, parse it and route the samples into the gauges.
//!
//! Failure handling:
//! - a connection-level failure (spawn error, failed connect, or a
//!   permission-denied / connection-closed marker in stderr) aborts the rest
//!   of the cycle
//! - a target whose output yields no samples is logged and skipped
//!
//! With a batch command configured, a cycle runs that single command and
//! splits its report into `-> type:revision` sections instead of listing
//! and fetching each target separately.
//!
//! Nothing escapes [`FetchOrchestrator::run_cycle`]; every path ends in a
//! [`CycleOutcome`]. Gauges that are not updated keep their last value.

use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::command_builder::{CommandBuilder, FetchMode};
use crate::cycle_stats::CycleStats;
use crate::executor::{run_classified, Connector, ExecutorError, RemoteExecutor};
use crate::gauges::GaugeRegistry;
use crate::parser::{parse_metrics, split_report_blocks};
use crate::selector::{discover, MonitorTarget, SelectionPolicy};
use std::collections::BTreeMap;

/// Per-cycle behavior.
#[derive(Debug, Clone, Default)]
pub struct FetchSettings {
    pub mode: FetchMode,
    /// Re-run discovery at the start of every cycle
    pub always_refresh: bool,
    pub policy: SelectionPolicy,
    /// Single command whose output reports every target in sections
    pub batch_command: Option<String>,
}

/// Counts for one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Targets in the working set
    pub targets: usize,
    /// Targets whose samples were routed
    pub updated: usize,
    /// Targets that produced no parseable samples
    pub empty: usize,
    /// Samples routed into gauges
    pub samples: usize,
    pub duration: Duration,
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Connection-level failure; remaining targets were not attempted.
    Aborted { reason: String, report: CycleReport },
    /// A previous cycle was still running.
    Skipped,
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Completed(_) => "completed",
            CycleOutcome::Aborted { .. } => "aborted",
            CycleOutcome::Skipped => "skipped",
        }
    }
}

/// Result of fetching a single target.
enum TargetResult {
    Routed(usize),
    Empty,
}

/// Drives fetch cycles against one execution target.
pub struct FetchOrchestrator {
    connector: Box<dyn Connector>,
    commands: CommandBuilder,
    settings: FetchSettings,
    gauges: Arc<GaugeRegistry>,
    stats: Arc<CycleStats>,
    targets: Vec<MonitorTarget>,
    discovered: bool,
}

impl FetchOrchestrator {
    pub fn new(
        connector: Box<dyn Connector>,
        commands: CommandBuilder,
        settings: FetchSettings,
        gauges: Arc<GaugeRegistry>,
        stats: Arc<CycleStats>,
    ) -> Self {
        Self {
            connector,
            commands,
            settings,
            gauges,
            stats,
            targets: Vec::new(),
            discovered: false,
        }
    }

    /// Uses a fixed working set. Discovery still runs when `always_refresh`
    /// is set.
    pub fn with_targets(mut self, targets: Vec<MonitorTarget>) -> Self {
        self.gauges.telemetry.targets.set(targets.len() as f64);
        self.stats.record_targets(&targets);
        self.targets = targets;
        self.discovered = true;
        self
    }

    pub fn targets(&self) -> &[MonitorTarget] {
        &self.targets
    }

    pub fn gauges(&self) -> &Arc<GaugeRegistry> {
        &self.gauges
    }

    /// Runs discovery now and replaces the working set on success.
    pub fn refresh(&mut self, executor: &dyn RemoteExecutor) -> Result<(), ExecutorError> {
        let targets = discover(executor, &self.commands, &self.settings.policy)?;
        self.gauges.telemetry.targets.set(targets.len() as f64);
        self.stats.record_targets(&targets);
        self.targets = targets;
        self.discovered = true;
        Ok(())
    }

    /// Runs one full cycle.
    #[instrument(skip(self))]
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let start = Instant::now();
        let telemetry = self.gauges.telemetry.clone();
        telemetry.fetch_in_progress.set(1.0);

        info!("Starting fetch cycle");

        let mut report = CycleReport::default();
        let result = self.run_targets(&mut report);
        report.duration = start.elapsed();
        let duration_secs = report.duration.as_secs_f64();

        let outcome = match result {
            Ok(()) => {
                info!(
                    "Fetch cycle completed: {} targets, {} updated, {} empty, {} samples, {:.2}s",
                    report.targets, report.updated, report.empty, report.samples, duration_secs
                );
                self.stats.record_completed(duration_secs, report.targets);
                telemetry.fetch_success.set(1.0);
                CycleOutcome::Completed(report)
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(
                    "Fetch cycle aborted after {} of {} targets: {}",
                    report.updated + report.empty,
                    report.targets,
                    reason
                );
                self.stats.record_aborted(duration_secs, &reason);
                telemetry.fetch_success.set(0.0);
                CycleOutcome::Aborted { reason, report }
            }
        };

        telemetry.fetch_duration_seconds.set(duration_secs);
        telemetry
            .cycles_total
            .with_label_values(&[outcome.label()])
            .inc();
        telemetry.fetch_in_progress.set(0.0);

        outcome
    }

    fn run_targets(&mut self, report: &mut CycleReport) -> Result<(), ExecutorError> {
        let executor = self.connector.connect()?;

        if let Some(command) = self.settings.batch_command.clone() {
            return self.run_batch(executor.as_ref(), &command, report);
        }

        if self.settings.always_refresh || !self.discovered {
            debug!("Refreshing monitor set");
            self.refresh(executor.as_ref())?;
        }

        report.targets = self.targets.len();
        if self.targets.is_empty() {
            warn!("No type:revision pairs to monitor");
        }

        for target in &self.targets {
            match self.fetch_target(executor.as_ref(), target)? {
                TargetResult::Routed(samples) => {
                    report.updated += 1;
                    report.samples += samples;
                }
                TargetResult::Empty => report.empty += 1,
            }
        }

        Ok(())
    }

    /// Runs the batch command and routes each report section. The working
    /// set becomes the sections that survive the ignore lists.
    fn run_batch(
        &mut self,
        executor: &dyn RemoteExecutor,
        command: &str,
        report: &mut CycleReport,
    ) -> Result<(), ExecutorError> {
        let output = run_classified(executor, command)?;
        let policy = &self.settings.policy;

        let blocks: Vec<_> = split_report_blocks(&output.stdout)
            .into_iter()
            .filter(|b| {
                !policy.ignore_types.contains(&b.target.type_name)
                    && !policy.ignore_revisions.contains(&b.target.revision)
            })
            .collect();

        if blocks.is_empty() {
            warn!(
                "No report sections found. Command: {}\nReceived stdout:\n{}\nReceived stderr:\n{}",
                command, output.stdout, output.stderr
            );
        }

        let mut newest: BTreeMap<&str, &str> = BTreeMap::new();
        if policy.newest_only {
            for block in &blocks {
                let entry = newest
                    .entry(block.target.type_name.as_str())
                    .or_insert(block.target.revision.as_str());
                if block.target.revision.as_str() > *entry {
                    *entry = block.target.revision.as_str();
                }
            }
        }

        let mut targets = Vec::new();
        for block in &blocks {
            let newest_revision = newest.get(block.target.type_name.as_str());
            if policy.newest_only && newest_revision != Some(&block.target.revision.as_str()) {
                continue;
            }

            let parsed = parse_metrics(block.body);
            if parsed.is_empty() {
                warn!(
                    "No metrics collected for {}. Command: {}\nReceived section:\n{}",
                    block.target, command, block.body
                );
                self.stats.record_empty_result();
                report.empty += 1;
            } else {
                let routed = self.gauges.route_all(&block.target, &parsed);
                self.stats.record_routed(routed);
                report.updated += 1;
                report.samples += routed;
            }
            targets.push(block.target.clone());
        }

        targets.sort();
        targets.dedup();
        report.targets = targets.len();
        self.gauges.telemetry.targets.set(targets.len() as f64);
        self.stats.record_targets(&targets);
        self.targets = targets;
        self.discovered = true;
        Ok(())
    }

    fn fetch_target(
        &self,
        executor: &dyn RemoteExecutor,
        target: &MonitorTarget,
    ) -> Result<TargetResult, ExecutorError> {
        let command = self.commands.fetch(target, self.settings.mode);
        let output = run_classified(executor, &command)?;

        let parsed = parse_metrics(&output.stdout);
        if parsed.is_empty() {
            warn!(
                "No metrics collected for {}. Command: {}\nReceived stdout:\n{}\nReceived stderr:\n{}",
                target, command, output.stdout, output.stderr
            );
            self.stats.record_empty_result();
            return Ok(TargetResult::Empty);
        }

        let routed = self.gauges.route_all(target, &parsed);
        self.stats.record_routed(routed);
        debug!(
            "Routed {} of {} samples for {}",
            routed,
            parsed.len(),
            target
        );
        Ok(TargetResult::Routed(routed))
    }
}

/// Serializes cycles on one orchestrator.
///
/// The scheduler calls [`FetchLoop::tick`] on every interval; a tick that
/// finds the previous cycle still running is counted and skipped rather
/// than queued.
pub struct FetchLoop {
    orchestrator: Mutex<FetchOrchestrator>,
    gauges: Arc<GaugeRegistry>,
    stats: Arc<CycleStats>,
}

impl FetchLoop {
    pub fn new(orchestrator: FetchOrchestrator) -> Self {
        let gauges = orchestrator.gauges.clone();
        let stats = orchestrator.stats.clone();
        Self {
            orchestrator: Mutex::new(orchestrator),
            gauges,
            stats,
        }
    }

    pub fn tick(&self) -> CycleOutcome {
        match self.orchestrator.try_lock() {
            Ok(mut guard) => guard.run_cycle(),
            Err(TryLockError::WouldBlock) => {
                debug!("Previous fetch cycle still running, skipping tick");
                self.stats.record_skipped();
                self.gauges
                    .telemetry
                    .cycles_total
                    .with_label_values(&[CycleOutcome::Skipped.label()])
                    .inc();
                CycleOutcome::Skipped
            }
            // A panic in an earlier cycle leaves the target list intact
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().run_cycle(),
        }
    }
}
