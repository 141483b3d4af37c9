//! Integration tests for fetch cycles against a scripted target.

mod common;

use common::{pipeline_script, GatedConnector, Script};
use pipeline_monitor_exporter::{
    CommandBuilder, CycleOutcome, CycleStats, FetchLoop, FetchOrchestrator, FetchSettings,
    GaugeRegistry, MonitorTarget, SeriesKind,
};
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

fn orchestrator_with(
    script: &Script,
    settings: FetchSettings,
    ignore_metrics: &[&str],
) -> (FetchOrchestrator, Arc<GaugeRegistry>, Arc<CycleStats>) {
    let gauges = Arc::new(GaugeRegistry::new(ignore_metrics.iter().copied()).unwrap());
    let stats = Arc::new(CycleStats::new());
    let orchestrator = FetchOrchestrator::new(
        script.connector(),
        CommandBuilder::default(),
        settings,
        gauges.clone(),
        stats.clone(),
    );
    (orchestrator, gauges, stats)
}

fn orchestrator(script: &Script) -> (FetchOrchestrator, Arc<GaugeRegistry>, Arc<CycleStats>) {
    orchestrator_with(script, FetchSettings::default(), &[])
}

fn completed(outcome: CycleOutcome) -> pipeline_monitor_exporter::CycleReport {
    match outcome {
        CycleOutcome::Completed(report) => report,
        other => panic!("expected completed cycle, got {:?}", other),
    }
}

#[test]
fn test_first_cycle_discovers_and_routes() {
    let script = pipeline_script();
    let (mut orch, gauges, stats) = orchestrator(&script);

    let report = completed(orch.run_cycle());
    assert_eq!(report.targets, 4);
    assert_eq!(report.updated, 4);
    assert_eq!(report.empty, 0);

    let daily = MonitorTarget::new("daily", "rev_01");
    assert_eq!(
        gauges.target_value(SeriesKind::ItemCount, &daily, "completed"),
        Some(10.0)
    );
    assert_eq!(
        gauges.target_value(SeriesKind::Processing, &daily, "running"),
        Some(2.0)
    );
    assert_eq!(
        gauges.target_value(SeriesKind::Processing, &daily, "pending"),
        Some(1.0)
    );
    assert_eq!(
        gauges.target_value(SeriesKind::Fairshare, &daily, ""),
        Some(0.5)
    );
    assert_eq!(
        gauges.target_value(
            SeriesKind::ItemCount,
            &MonitorTarget::new("weekly", "rev_10"),
            "failed"
        ),
        Some(4.0)
    );

    assert_eq!(stats.monitored_targets().len(), 4);
    assert_eq!(gauges.telemetry.targets.get(), 4.0);
    assert_eq!(gauges.telemetry.fetch_success.get(), 1.0);
    assert_eq!(gauges.telemetry.fetch_in_progress.get(), 0.0);
    assert_eq!(
        gauges
            .telemetry
            .cycles_total
            .with_label_values(&["completed"])
            .get(),
        1.0
    );
}

#[test]
fn test_discovery_runs_once_without_always_refresh() {
    let script = pipeline_script();
    let (mut orch, _gauges, _stats) = orchestrator(&script);

    completed(orch.run_cycle());
    script.clear_calls();
    completed(orch.run_cycle());

    let calls = script.calls();
    assert!(calls.iter().all(|c| c.starts_with("chp item status")));
    assert_eq!(calls.len(), 4);
    assert_eq!(script.connects(), 2);
}

#[test]
fn test_always_refresh_rediscovers_every_cycle() {
    let script = pipeline_script();
    let settings = FetchSettings {
        always_refresh: true,
        ..FetchSettings::default()
    };
    let (mut orch, _gauges, _stats) = orchestrator_with(&script, settings, &[]);

    completed(orch.run_cycle());

    // A new revision shows up between cycles
    script
        .respond("chp rev list daily", "rev_01\nrev_02\nrev_03\n")
        .respond("chp item status daily:rev_03", "completed: 1\n");
    script.clear_calls();

    let report = completed(orch.run_cycle());
    assert_eq!(report.targets, 5);
    assert_eq!(script.calls()[0], "chp type list");
    assert!(orch
        .targets()
        .contains(&MonitorTarget::new("daily", "rev_03")));
}

#[test]
fn test_permission_denied_aborts_remaining_targets() {
    let script = pipeline_script();
    let (mut orch, gauges, stats) = orchestrator(&script);
    completed(orch.run_cycle());

    // Second target in order fails; later ones must not be attempted
    script
        .respond("chp item status daily:rev_01", "completed: 11\n")
        .respond_stderr(
            "chp item status daily:rev_02",
            "",
            "user@cluster: Permission denied (publickey).",
        )
        .respond("chp item status weekly:rev_10", "failed: 99\n");
    script.clear_calls();

    match orch.run_cycle() {
        CycleOutcome::Aborted { reason, report } => {
            assert!(reason.contains("permission denied"), "reason: {reason}");
            assert_eq!(report.updated, 1);
        }
        other => panic!("expected abort, got {:?}", other),
    }

    assert_eq!(
        script.calls(),
        vec![
            "chp item status daily:rev_01".to_string(),
            "chp item status daily:rev_02".to_string(),
        ]
    );
    // Targets before the failure were updated, later ones keep old values
    assert_eq!(
        gauges.target_value(
            SeriesKind::ItemCount,
            &MonitorTarget::new("daily", "rev_01"),
            "completed"
        ),
        Some(11.0)
    );
    assert_eq!(
        gauges.target_value(
            SeriesKind::ItemCount,
            &MonitorTarget::new("weekly", "rev_10"),
            "failed"
        ),
        Some(4.0)
    );
    assert_eq!(gauges.telemetry.fetch_success.get(), 0.0);
    assert_eq!(stats.aborted_cycles.load(Ordering::Relaxed), 1);
    assert!(stats.last_success().is_some());
}

#[test]
fn test_connection_closed_during_discovery_aborts() {
    let script = pipeline_script();
    script.respond_stderr(
        "chp rev list daily",
        "",
        "Connection closed by remote host\r\n",
    );
    let (mut orch, _gauges, _stats) = orchestrator(&script);

    let outcome = orch.run_cycle();
    assert_eq!(outcome.label(), "aborted");
    assert!(!script.calls().iter().any(|c| c.contains("item status")));
}

#[test]
fn test_empty_stdout_leaves_previous_values() {
    let script = pipeline_script();
    let (mut orch, gauges, stats) = orchestrator(&script);
    completed(orch.run_cycle());

    script.respond_stderr("chp item status weekly:rev_2", "", "chp: lock held\n");
    let report = completed(orch.run_cycle());
    assert_eq!(report.empty, 1);
    assert_eq!(report.updated, 3);

    assert_eq!(
        gauges.target_value(
            SeriesKind::Processing,
            &MonitorTarget::new("weekly", "rev_2"),
            "running"
        ),
        Some(7.0)
    );
    assert_eq!(stats.empty_results.load(Ordering::Relaxed), 1);
}

#[test]
fn test_unparseable_stdout_counts_as_empty() {
    let script = pipeline_script();
    script.respond("chp item status daily:rev_02", "no items yet\n");
    let (mut orch, _gauges, _stats) = orchestrator(&script);

    let report = completed(orch.run_cycle());
    assert_eq!(report.empty, 1);
}

/// Pipeline series lines of the exposition, telemetry excluded.
fn pipeline_exposition(gauges: &GaugeRegistry) -> String {
    gauges
        .encode()
        .unwrap()
        .lines()
        .filter(|line| {
            line.starts_with("chp_")
                || line.starts_with("# HELP chp_")
                || line.starts_with("# TYPE chp_")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn test_all_empty_cycle_leaves_exposition_unchanged() {
    let script = pipeline_script();
    let (mut orch, gauges, _stats) = orchestrator(&script);
    completed(orch.run_cycle());

    let before = pipeline_exposition(&gauges);
    assert!(before.contains("chp_item_count{"));

    for target in ["daily:rev_01", "daily:rev_02", "weekly:rev_10", "weekly:rev_2"] {
        script.respond(&format!("chp item status {target}"), "");
    }
    let report = completed(orch.run_cycle());
    assert_eq!(report.empty, 4);
    assert_eq!(report.updated, 0);

    assert_eq!(pipeline_exposition(&gauges), before);
}

#[test]
fn test_ignored_metrics_are_not_exported() {
    let script = pipeline_script();
    let (mut orch, gauges, _stats) =
        orchestrator_with(&script, FetchSettings::default(), &["completed", "fairshare"]);

    completed(orch.run_cycle());

    let daily = MonitorTarget::new("daily", "rev_01");
    assert_eq!(
        gauges.target_value(SeriesKind::ItemCount, &daily, "completed"),
        None
    );
    // never set, so still at its initial value
    assert_eq!(
        gauges.target_value(SeriesKind::Fairshare, &daily, ""),
        Some(0.0)
    );
    assert_eq!(
        gauges.target_value(SeriesKind::Processing, &daily, "running"),
        Some(2.0)
    );
}

#[test]
fn test_connect_failure_aborts_without_commands() {
    let script = pipeline_script();
    script.fail_connect("host unreachable");
    let (mut orch, gauges, stats) = orchestrator(&script);

    match orch.run_cycle() {
        CycleOutcome::Aborted { reason, report } => {
            assert!(reason.contains("host unreachable"));
            assert_eq!(report.targets, 0);
        }
        other => panic!("expected abort, got {:?}", other),
    }
    assert!(script.calls().is_empty());
    // only the unlabeled fairshare gauge
    assert_eq!(gauges.series_count(), 1);
    assert!(stats.last_success().is_none());
}

#[test]
fn test_fixed_targets_skip_discovery() {
    let script = pipeline_script();
    let (orch, _gauges, stats) = orchestrator(&script);
    let mut orch = orch.with_targets(vec![MonitorTarget::new("daily", "rev_01")]);

    let report = completed(orch.run_cycle());
    assert_eq!(report.targets, 1);
    assert_eq!(script.calls(), vec!["chp item status daily:rev_01".to_string()]);
    assert_eq!(stats.monitored_targets().len(), 1);
}

#[test]
fn test_tick_skips_while_cycle_running() {
    let script = pipeline_script();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let connector = GatedConnector {
        script: script.clone(),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    };

    let gauges = Arc::new(GaugeRegistry::new(Vec::<String>::new()).unwrap());
    let stats = Arc::new(CycleStats::new());
    let orch = FetchOrchestrator::new(
        Box::new(connector),
        CommandBuilder::default(),
        FetchSettings::default(),
        gauges.clone(),
        stats.clone(),
    );
    let fetch_loop = Arc::new(FetchLoop::new(orch));

    let running = {
        let fetch_loop = fetch_loop.clone();
        thread::spawn(move || fetch_loop.tick())
    };

    entered_rx.recv().unwrap();
    assert_eq!(gauges.telemetry.fetch_in_progress.get(), 1.0);
    assert_eq!(fetch_loop.tick(), CycleOutcome::Skipped);

    release_tx.send(()).unwrap();
    let outcome = running.join().unwrap();
    assert_eq!(outcome.label(), "completed");

    assert_eq!(stats.skipped_cycles.load(Ordering::Relaxed), 1);
    assert_eq!(
        gauges
            .telemetry
            .cycles_total
            .with_label_values(&["skipped"])
            .get(),
        1.0
    );
}

const BATCH_COMMAND: &str = "chp metrics report";

fn batch_settings() -> FetchSettings {
    FetchSettings {
        batch_command: Some(BATCH_COMMAND.to_string()),
        ..FetchSettings::default()
    }
}

fn batch_script() -> Script {
    let script = Script::new();
    script.respond(
        BATCH_COMMAND,
        "Report generated 2024-06-01\n\
         -> daily:rev_01\ncompleted: 10\nrunning: 2\n\
         -> daily:rev_02\ncompleted: 3\n\
         -> weekly:rev_10\nnothing to report\n",
    );
    script
}

#[test]
fn test_batch_report_routes_each_section() {
    let script = batch_script();
    let (mut orch, gauges, stats) = orchestrator_with(&script, batch_settings(), &[]);

    let report = completed(orch.run_cycle());
    assert_eq!(report.targets, 3);
    assert_eq!(report.updated, 2);
    assert_eq!(report.empty, 1);
    assert_eq!(script.calls(), vec![BATCH_COMMAND]);

    assert_eq!(
        gauges.target_value(
            SeriesKind::ItemCount,
            &MonitorTarget::new("daily", "rev_01"),
            "completed"
        ),
        Some(10.0)
    );
    assert_eq!(
        gauges.target_value(
            SeriesKind::Processing,
            &MonitorTarget::new("daily", "rev_01"),
            "running"
        ),
        Some(2.0)
    );
    assert_eq!(
        gauges.target_value(
            SeriesKind::ItemCount,
            &MonitorTarget::new("daily", "rev_02"),
            "completed"
        ),
        Some(3.0)
    );
    assert_eq!(orch.targets().len(), 3);
    assert_eq!(stats.monitored_targets().len(), 3);
}

#[test]
fn test_batch_report_applies_selection_policy() {
    let script = batch_script();
    let mut settings = batch_settings();
    settings.policy.ignore_types.insert("weekly".to_string());
    settings.policy.newest_only = true;
    let (mut orch, gauges, _stats) = orchestrator_with(&script, settings, &[]);

    let report = completed(orch.run_cycle());
    assert_eq!(report.targets, 1);
    assert_eq!(orch.targets(), &[MonitorTarget::new("daily", "rev_02")]);
    assert_eq!(
        gauges.target_value(
            SeriesKind::ItemCount,
            &MonitorTarget::new("daily", "rev_01"),
            "completed"
        ),
        None
    );
}

#[test]
fn test_batch_report_permission_denied_aborts() {
    let script = Script::new();
    script.respond_stderr(BATCH_COMMAND, "", "Permission denied (publickey).\n");
    let (mut orch, gauges, _stats) = orchestrator_with(&script, batch_settings(), &[]);

    match orch.run_cycle() {
        CycleOutcome::Aborted { reason, .. } => {
            assert!(reason.contains("permission denied"), "{reason}")
        }
        other => panic!("expected aborted cycle, got {:?}", other),
    }
    assert_eq!(gauges.series_count(), 1);
}
