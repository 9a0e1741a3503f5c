//! Request-scoped metric sink
//!
//! Every scrape builds a [`ScrapeContext`] with its own Prometheus registry,
//! so a pass only ever exposes the observations it produced itself.

use crate::error::SkipReason;
use crate::models::{HeartbeatLabels, HeartbeatObservation, HeartbeatState};
use prometheus::core::Collector;
use prometheus::{Encoder, Gauge, GaugeVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Name of the per-machine heartbeat gauge
pub const HEARTBEAT_METRIC: &str = "sls_machine_heartbeat";

const HEARTBEAT_LABELS: &[&str] = &["machine", "region", "project", "machine_group"];
const SKIP_LABELS: &[&str] = &["region_id", "project", "machine_group", "reason"];

/// Label-addressed gauge store written by reconciliation tasks
///
/// Writes go through the Prometheus vectors, which lock internally, so
/// concurrent tasks can share one sink behind an `Arc`.
pub struct HeartbeatSink {
    heartbeat: GaugeVec,
    skips: IntCounterVec,
    groups_checked: IntGauge,
    scrape_duration_seconds: Gauge,
}

impl HeartbeatSink {
    fn new() -> prometheus::Result<Self> {
        Ok(Self {
            heartbeat: GaugeVec::new(
                Opts::new(HEARTBEAT_METRIC, "Heartbeat status of machines"),
                HEARTBEAT_LABELS,
            )?,
            skips: IntCounterVec::new(
                Opts::new(
                    "sls_heartbeat_reconcile_skips_total",
                    "Units of work abandoned during the last reconciliation pass",
                ),
                SKIP_LABELS,
            )?,
            groups_checked: IntGauge::new(
                "sls_heartbeat_machine_groups_checked",
                "Machine groups fully reconciled during the last pass",
            )?,
            scrape_duration_seconds: Gauge::new(
                "sls_heartbeat_scrape_duration_seconds",
                "Wall time of the last reconciliation pass",
            )?,
        })
    }

    fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.heartbeat.clone()))?;
        registry.register(Box::new(self.skips.clone()))?;
        registry.register(Box::new(self.groups_checked.clone()))?;
        registry.register(Box::new(self.scrape_duration_seconds.clone()))?;
        Ok(())
    }

    /// Record a machine's heartbeat state, last write wins per label tuple
    pub fn set(&self, labels: &HeartbeatLabels, state: HeartbeatState) {
        self.heartbeat
            .with_label_values(&[
                labels.machine.as_str(),
                labels.region.as_str(),
                labels.project.as_str(),
                labels.machine_group.as_str(),
            ])
            .set(state.as_gauge());
    }

    /// Count a unit of work that was abandoned
    ///
    /// `machine_group` is empty for project or region level skips.
    pub fn record_skip(&self, region_id: &str, project: &str, machine_group: &str, reason: SkipReason) {
        self.skips
            .with_label_values(&[region_id, project, machine_group, reason.as_str()])
            .inc();
    }

    pub fn set_groups_checked(&self, count: usize) {
        self.groups_checked.set(count as i64);
    }

    pub fn set_scrape_duration(&self, secs: f64) {
        self.scrape_duration_seconds.set(secs);
    }

    /// Snapshot of all heartbeat observations currently held
    pub fn observations(&self) -> Vec<HeartbeatObservation> {
        let mut out = Vec::new();

        for family in self.heartbeat.collect() {
            for metric in family.get_metric() {
                let label = |name: &str| {
                    metric
                        .get_label()
                        .iter()
                        .find(|pair| pair.get_name() == name)
                        .map(|pair| pair.get_value().to_string())
                        .unwrap_or_default()
                };
                let state = if metric.get_gauge().get_value() >= 1.0 {
                    HeartbeatState::Up
                } else {
                    HeartbeatState::Down
                };

                out.push(HeartbeatObservation {
                    labels: HeartbeatLabels {
                        machine: label("machine"),
                        region: label("region"),
                        project: label("project"),
                        machine_group: label("machine_group"),
                    },
                    state,
                });
            }
        }

        out.sort_by(|a, b| a.labels.cmp(&b.labels));
        out
    }

    /// Total skips recorded for a reason
    pub fn skip_count(&self, reason: SkipReason) -> u64 {
        self.skips
            .collect()
            .iter()
            .flat_map(|family| family.get_metric())
            .filter(|metric| {
                metric
                    .get_label()
                    .iter()
                    .any(|pair| pair.get_name() == "reason" && pair.get_value() == reason.as_str())
            })
            .map(|metric| metric.get_counter().get_value() as u64)
            .sum()
    }
}

/// Registry and sink owned by a single scrape
pub struct ScrapeContext {
    registry: Registry,
    sink: Arc<HeartbeatSink>,
}

impl ScrapeContext {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let sink = HeartbeatSink::new()?;
        sink.register(&registry)?;

        Ok(Self {
            registry,
            sink: Arc::new(sink),
        })
    }

    pub fn sink(&self) -> Arc<HeartbeatSink> {
        Arc::clone(&self.sink)
    }

    /// Encode the registry in the Prometheus text format
    pub fn render(&self) -> prometheus::Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}
