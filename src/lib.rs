//! Pipeline Monitor Exporter Library
//!
//! Polls a remote compute cluster for the status of pipeline job types and
//! revisions, parses the free-text output into numeric samples and exposes
//! them as Prometheus gauges.
//!
//! # Pipeline
//!
//! - [`executor`]: runs command strings over SSH or as a local subprocess
//! - [`command_builder`]: formats the pipeline tool invocations
//! - [`parser`]: extracts `label: number` samples from text
//! - [`selector`]: discovers and filters the (type, revision) pairs to poll
//! - [`gauges`]: routes samples into labeled Prometheus series
//! - [`orchestrator`]: drives one fetch cycle end to end
//!
//! # Usage
//!
//! ```rust
//! use pipeline_monitor_exporter::{parse_metrics, GaugeRegistry, MonitorTarget};
//!
//! let gauges = GaugeRegistry::new(Vec::<String>::new()).unwrap();
//! let target = MonitorTarget::new("daily", "rev_07");
//!
//! let samples = parse_metrics("completed: 12\nrunning: 3\nfairshare: 0.5");
//! gauges.route_all(&target, &samples);
//!
//! println!("{}", gauges.encode().unwrap());
//! ```

pub mod command_builder;
pub mod config;
pub mod cycle_stats;
pub mod executor;
pub mod gauges;
pub mod orchestrator;
pub mod parser;
pub mod selector;

// Re-export main types for convenience
pub use command_builder::{is_safe_name, CommandBuilder, FetchMode};
pub use config::{load_config, validate_effective_config, Config, ConfigError};
pub use cycle_stats::CycleStats;
pub use executor::{
    classify_stderr, CommandOutput, ConnectionConfig, Connector, ExecutorError, RemoteExecutor,
    ShellSetup,
};
pub use gauges::{GaugeRegistry, SeriesKind};
pub use orchestrator::{CycleOutcome, CycleReport, FetchLoop, FetchOrchestrator, FetchSettings};
pub use parser::{parse_metrics, split_report_blocks, MetricValue, ParsedMetrics, ReportBlock};
pub use selector::{discover, MonitorTarget, SelectionPolicy};
