//! Structured logging for exporter events
//!
//! Records are emitted through `tracing`; the binary installs a JSON
//! formatter so each event carries an `event` field for filtering.

use crate::error::SkipReason;
use crate::reconcile::PassSummary;
use std::time::Duration;
use tracing::{info, warn};

/// Structured logger for exporter events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Log exporter startup
    pub fn log_startup(&self, version: &str, listen_addr: &str, regions: usize, projects: usize) {
        info!(
            event = "exporter_started",
            instance = %self.instance,
            version = %version,
            listen_addr = %listen_addr,
            regions = regions,
            projects = projects,
            "Heartbeat exporter started"
        );
    }

    /// Log exporter shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "exporter_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Heartbeat exporter shutting down"
        );
    }

    /// Log a unit of work abandoned during a pass
    pub fn log_unit_skipped(
        &self,
        region_id: &str,
        project: &str,
        machine_group: Option<&str>,
        reason: SkipReason,
        error: &dyn std::fmt::Display,
    ) {
        warn!(
            event = "unit_skipped",
            instance = %self.instance,
            region_id = %region_id,
            project = %project,
            machine_group = machine_group.unwrap_or(""),
            reason = %reason,
            error = %error,
            "Skipping unit of work for this pass"
        );
    }

    /// Log the outcome of a reconciliation pass
    pub fn log_pass_completed(&self, summary: &PassSummary, elapsed: Duration) {
        if summary.has_skips() {
            warn!(
                event = "pass_completed",
                instance = %self.instance,
                groups_checked = summary.groups_checked,
                groups_skipped = summary.groups_skipped,
                projects_skipped = summary.projects_skipped,
                targets_skipped = summary.targets_skipped,
                machines_up = summary.up,
                machines_down = summary.down,
                elapsed_ms = elapsed.as_millis() as u64,
                "Reconciliation pass completed with skipped units"
            );
        } else {
            info!(
                event = "pass_completed",
                instance = %self.instance,
                groups_checked = summary.groups_checked,
                machines_up = summary.up,
                machines_down = summary.down,
                elapsed_ms = elapsed.as_millis() as u64,
                "Reconciliation pass completed"
            );
        }
    }
}
