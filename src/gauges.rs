//! Prometheus series for pipeline status and the routing rules that map a
//! parsed key to a series and label set.
//!
//! Routing:
//! - `fairshare` goes to the unlabeled `chp_fairshare` gauge
//! - `pending` / `running` go to `chp_item_processing{type,revision,state}`
//! - everything else goes to `chp_item_count{type,revision,state}`
//!
//! Keys in the ignore set are dropped before routing. Every update
//! overwrites the previous value for its label combination. Label
//! combinations are never removed, so values stay visible (stale) when a
//! target stops reporting.

use ahash::AHashSet;
use prometheus::{CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use tracing::trace;

use crate::parser::ParsedMetrics;
use crate::selector::MonitorTarget;

pub const FAIRSHARE_SERIES: &str = "chp_fairshare";
pub const PROCESSING_SERIES: &str = "chp_item_processing";
pub const ITEM_COUNT_SERIES: &str = "chp_item_count";

/// Key routed to the cluster-wide fairshare gauge.
pub const FAIRSHARE_KEY: &str = "fairshare";

/// Keys routed to the processing series.
pub const PROCESSING_STATES: [&str; 2] = ["pending", "running"];

/// Label schema shared by the per-target series.
pub const TARGET_LABELS: [&str; 3] = ["type", "revision", "state"];

/// Buffer capacity for metrics encoding.
const BUFFER_CAP: usize = 64 * 1024;

/// The series a key is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesKind {
    Fairshare,
    Processing,
    ItemCount,
}

impl SeriesKind {
    pub fn for_key(key: &str) -> Self {
        if key == FAIRSHARE_KEY {
            SeriesKind::Fairshare
        } else if PROCESSING_STATES.contains(&key) {
            SeriesKind::Processing
        } else {
            SeriesKind::ItemCount
        }
    }

    pub fn series_name(&self) -> &'static str {
        match self {
            SeriesKind::Fairshare => FAIRSHARE_SERIES,
            SeriesKind::Processing => PROCESSING_SERIES,
            SeriesKind::ItemCount => ITEM_COUNT_SERIES,
        }
    }
}

/// Internal gauges describing the fetch loop itself.
#[derive(Clone)]
pub struct ExporterTelemetry {
    pub fetch_duration_seconds: Gauge,
    pub fetch_success: Gauge,
    pub fetch_in_progress: Gauge,
    pub targets: Gauge,
    pub cycles_total: CounterVec, // labels: outcome
}

impl ExporterTelemetry {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let fetch_duration_seconds = Gauge::new(
            "pipeline_monitor_fetch_duration_seconds",
            "Time spent in the last fetch cycle",
        )?;
        let fetch_success = Gauge::new(
            "pipeline_monitor_fetch_success",
            "Whether the last fetch cycle completed (1) or was aborted (0)",
        )?;
        let fetch_in_progress = Gauge::new(
            "pipeline_monitor_fetch_in_progress",
            "Whether a fetch cycle is currently running (1) or idle (0)",
        )?;
        let targets = Gauge::new(
            "pipeline_monitor_targets",
            "Number of type:revision pairs currently monitored",
        )?;
        let cycles_total = CounterVec::new(
            Opts::new(
                "pipeline_monitor_cycles_total",
                "Fetch cycles by outcome (completed, aborted, skipped)",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(fetch_duration_seconds.clone()))?;
        registry.register(Box::new(fetch_success.clone()))?;
        registry.register(Box::new(fetch_in_progress.clone()))?;
        registry.register(Box::new(targets.clone()))?;
        registry.register(Box::new(cycles_total.clone()))?;

        Ok(Self {
            fetch_duration_seconds,
            fetch_success,
            fetch_in_progress,
            targets,
            cycles_total,
        })
    }
}

/// Owns the Prometheus registry and the pipeline series.
///
/// Gauge updates are atomic per label combination, so the scrape handler can
/// encode concurrently with a running cycle.
pub struct GaugeRegistry {
    registry: Registry,
    fairshare: Gauge,
    processing: GaugeVec,
    item_count: GaugeVec,
    ignore_metrics: AHashSet<String>,
    pub telemetry: ExporterTelemetry,
}

impl GaugeRegistry {
    /// Creates a fresh registry with all series registered.
    pub fn new<I, S>(ignore_metrics: I) -> Result<Self, prometheus::Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Registry::new();

        let fairshare = Gauge::new(FAIRSHARE_SERIES, "Current group fairshare on the cluster")?;
        let processing = GaugeVec::new(
            Opts::new(
                PROCESSING_SERIES,
                "Pipeline jobs currently in the scheduler queue",
            ),
            &TARGET_LABELS,
        )?;
        let item_count = GaugeVec::new(
            Opts::new(
                ITEM_COUNT_SERIES,
                "Available, not submitted, complete, and failed pipeline jobs",
            ),
            &TARGET_LABELS,
        )?;

        registry.register(Box::new(fairshare.clone()))?;
        registry.register(Box::new(processing.clone()))?;
        registry.register(Box::new(item_count.clone()))?;

        let telemetry = ExporterTelemetry::new(&registry)?;

        Ok(Self {
            registry,
            fairshare,
            processing,
            item_count,
            ignore_metrics: ignore_metrics.into_iter().map(Into::into).collect(),
            telemetry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn is_ignored(&self, key: &str) -> bool {
        self.ignore_metrics.contains(key)
    }

    /// Routes one sample. Returns the series it landed in, or `None` when
    /// the key is ignored.
    pub fn route(&self, target: &MonitorTarget, key: &str, value: f64) -> Option<SeriesKind> {
        if self.is_ignored(key) {
            trace!("Ignoring metric {} for {}", key, target);
            return None;
        }

        let kind = SeriesKind::for_key(key);
        let labels = [target.type_name.as_str(), target.revision.as_str(), key];

        match kind {
            SeriesKind::Fairshare => self.fairshare.set(value),
            SeriesKind::Processing => self.processing.with_label_values(&labels).set(value),
            SeriesKind::ItemCount => self.item_count.with_label_values(&labels).set(value),
        }

        trace!("{}{{{}}} {} = {}", kind.series_name(), target, key, value);
        Some(kind)
    }

    /// Routes every sample parsed for `target`. Returns the number routed.
    pub fn route_all(&self, target: &MonitorTarget, metrics: &ParsedMetrics) -> usize {
        metrics
            .iter()
            .filter_map(|(key, value)| self.route(target, key, value.as_f64()))
            .count()
    }

    /// Current value of a series for the given labels, without creating it.
    pub fn value(&self, series: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let families = self.registry.gather();
        let family = families.iter().find(|f| f.name() == series)?;

        family
            .get_metric()
            .iter()
            .find(|m| {
                let pairs = m.get_label();
                pairs.len() == labels.len()
                    && labels.iter().all(|(name, value)| {
                        pairs
                            .iter()
                            .any(|p| p.name() == *name && p.value() == *value)
                    })
            })
            .map(|m| m.get_gauge().value())
    }

    /// Value of a per-target series for one state.
    pub fn target_value(
        &self,
        kind: SeriesKind,
        target: &MonitorTarget,
        state: &str,
    ) -> Option<f64> {
        match kind {
            SeriesKind::Fairshare => self.value(FAIRSHARE_SERIES, &[]),
            _ => self.value(
                kind.series_name(),
                &[
                    ("type", target.type_name.as_str()),
                    ("revision", target.revision.as_str()),
                    ("state", state),
                ],
            ),
        }
    }

    /// Number of exported pipeline time series (excluding telemetry).
    pub fn series_count(&self) -> usize {
        self.registry
            .gather()
            .iter()
            .filter(|f| {
                [FAIRSHARE_SERIES, PROCESSING_SERIES, ITEM_COUNT_SERIES].contains(&f.name())
            })
            .map(|f| f.get_metric().len())
            .sum()
    }

    /// Encodes the whole registry in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let families = self.registry.gather();
        let mut buffer = Vec::with_capacity(BUFFER_CAP);
        TextEncoder::new().encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
