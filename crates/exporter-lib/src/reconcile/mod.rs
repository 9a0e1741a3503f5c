//! Per-scrape reconciliation of machine group heartbeats
//!
//! A [`Reconciler`] walks every configured (region, project) target, lists
//! the project's machine groups and spawns one task per group. Each task
//! compares the group's desired membership against the machines actually
//! heartbeating and writes one observation per machine into the scrape's
//! [`HeartbeatSink`]. Tasks run under a semaphore sized from configuration
//! and the pass returns only after every task has finished.
//!
//! Nothing is retained between passes. Failures only abandon the unit of
//! work that hit them and are counted in the sink.
//!
//! Directory calls carry no timeout at this layer; a hung upstream call
//! holds the pass open until the HTTP client's own timeout fires.

mod diff;

#[cfg(test)]
mod tests;

pub use diff::heartbeat_states;

use crate::directory::{DirectoryClient, DirectoryClientFactory};
use crate::error::SkipReason;
use crate::models::{HeartbeatLabels, HeartbeatState, TargetList};
use crate::observability::StructuredLogger;
use crate::region::region_label;
use crate::sink::HeartbeatSink;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default number of machine groups reconciled at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Counts describing one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub groups_checked: usize,
    pub groups_skipped: usize,
    pub projects_skipped: usize,
    pub targets_skipped: usize,
    pub up: usize,
    pub down: usize,
}

impl PassSummary {
    pub fn has_skips(&self) -> bool {
        self.groups_skipped > 0 || self.projects_skipped > 0 || self.targets_skipped > 0
    }
}

/// Result of one machine group task
#[derive(Debug)]
enum GroupOutcome {
    Checked { up: usize, down: usize },
    Skipped,
}

/// One machine group to reconcile
struct GroupWork {
    client: Arc<dyn DirectoryClient>,
    region_id: String,
    region_label: String,
    project: String,
    group: String,
}

impl GroupWork {
    async fn run(self, sink: &HeartbeatSink, logger: &StructuredLogger) -> GroupOutcome {
        let (desired, actual) = tokio::join!(
            self.client
                .get_machine_group_membership(&self.project, &self.group),
            self.client.list_actual_machines(&self.project, &self.group),
        );

        let desired = match desired {
            Ok(machines) => machines,
            Err(e) => return self.skip(sink, logger, SkipReason::DesiredMembership, &e),
        };
        let actual = match actual {
            Ok(machines) => machines,
            Err(e) => return self.skip(sink, logger, SkipReason::ActualMembership, &e),
        };

        let (mut up, mut down) = (0, 0);
        for (machine, state) in heartbeat_states(&desired, &actual) {
            match state {
                HeartbeatState::Up => up += 1,
                HeartbeatState::Down => down += 1,
            }
            let labels = HeartbeatLabels {
                machine,
                region: self.region_label.clone(),
                project: self.project.clone(),
                machine_group: self.group.clone(),
            };
            sink.set(&labels, state);
        }

        debug!(
            region_id = %self.region_id,
            project = %self.project,
            machine_group = %self.group,
            up = up,
            down = down,
            "Machine group reconciled"
        );

        GroupOutcome::Checked { up, down }
    }

    fn skip(
        &self,
        sink: &HeartbeatSink,
        logger: &StructuredLogger,
        reason: SkipReason,
        error: &dyn std::fmt::Display,
    ) -> GroupOutcome {
        logger.log_unit_skipped(&self.region_id, &self.project, Some(&self.group), reason, error);
        sink.record_skip(&self.region_id, &self.project, &self.group, reason);
        GroupOutcome::Skipped
    }
}

/// Identity of a spawned group task, kept to attribute task failures
struct GroupUnit {
    region_id: String,
    project: String,
    group: String,
}

impl From<&GroupWork> for GroupUnit {
    fn from(work: &GroupWork) -> Self {
        Self {
            region_id: work.region_id.clone(),
            project: work.project.clone(),
            group: work.group.clone(),
        }
    }
}

/// Request-scoped reconciliation engine
pub struct Reconciler {
    factory: Arc<dyn DirectoryClientFactory>,
    permits: Arc<Semaphore>,
    logger: StructuredLogger,
}

impl Reconciler {
    /// Create an engine that runs at most `max_concurrency` group tasks at once
    pub fn new(
        factory: Arc<dyn DirectoryClientFactory>,
        max_concurrency: usize,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            factory,
            permits: Arc::new(Semaphore::new(
                max_concurrency.clamp(1, Semaphore::MAX_PERMITS),
            )),
            logger,
        }
    }

    /// Run one full pass over `targets`, writing observations into `sink`
    pub async fn reconcile(&self, targets: &TargetList, sink: Arc<HeartbeatSink>) -> PassSummary {
        let start = Instant::now();
        let mut summary = PassSummary::default();
        let mut tasks = JoinSet::new();
        let mut units: HashMap<task::Id, GroupUnit> = HashMap::new();

        for (region_id, projects) in targets.regions() {
            let label = match region_label(region_id) {
                Ok(label) => label.to_string(),
                Err(e) => {
                    self.skip_region(&sink, region_id, projects, SkipReason::MalformedRegion, &e);
                    summary.targets_skipped += projects.len();
                    continue;
                }
            };

            // One client per region, shared read-only by its group tasks
            let client = match self.factory.client_for_region(region_id) {
                Ok(client) => client,
                Err(e) => {
                    self.skip_region(&sink, region_id, projects, SkipReason::Client, &e);
                    summary.targets_skipped += projects.len();
                    continue;
                }
            };

            for project in projects {
                let groups = match client.list_machine_groups(project).await {
                    Ok(groups) => groups,
                    Err(e) => {
                        self.logger.log_unit_skipped(
                            region_id,
                            project,
                            None,
                            SkipReason::ListMachineGroups,
                            &e,
                        );
                        sink.record_skip(region_id, project, "", SkipReason::ListMachineGroups);
                        summary.projects_skipped += 1;
                        continue;
                    }
                };

                debug!(
                    region_id = %region_id,
                    project = %project,
                    machine_groups = groups.len(),
                    "Listed machine groups"
                );

                for group in groups {
                    let work = GroupWork {
                        client: Arc::clone(&client),
                        region_id: region_id.to_string(),
                        region_label: label.clone(),
                        project: project.clone(),
                        group,
                    };
                    let sink = Arc::clone(&sink);
                    let permits = Arc::clone(&self.permits);
                    let logger = self.logger.clone();
                    let unit = GroupUnit::from(&work);

                    let handle = tasks.spawn(async move {
                        // The semaphore is private to this engine and never closed
                        let _permit = permits.acquire_owned().await.ok();
                        work.run(&sink, &logger).await
                    });
                    units.insert(handle.id(), unit);
                }
            }
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, GroupOutcome::Checked { up, down })) => {
                    units.remove(&id);
                    summary.groups_checked += 1;
                    summary.up += up;
                    summary.down += down;
                }
                Ok((id, GroupOutcome::Skipped)) => {
                    units.remove(&id);
                    summary.groups_skipped += 1;
                }
                Err(e) => {
                    summary.groups_skipped += 1;
                    match units.remove(&e.id()) {
                        Some(unit) => {
                            self.logger.log_unit_skipped(
                                &unit.region_id,
                                &unit.project,
                                Some(&unit.group),
                                SkipReason::Task,
                                &e,
                            );
                            sink.record_skip(
                                &unit.region_id,
                                &unit.project,
                                &unit.group,
                                SkipReason::Task,
                            );
                        }
                        None => warn!(error = %e, "Unknown machine group task failed"),
                    }
                }
            }
        }

        let elapsed = start.elapsed();
        sink.set_groups_checked(summary.groups_checked);
        sink.set_scrape_duration(elapsed.as_secs_f64());
        self.logger.log_pass_completed(&summary, elapsed);

        summary
    }

    fn skip_region(
        &self,
        sink: &HeartbeatSink,
        region_id: &str,
        projects: &[String],
        reason: SkipReason,
        error: &dyn std::fmt::Display,
    ) {
        for project in projects {
            self.logger
                .log_unit_skipped(region_id, project, None, reason, error);
            sink.record_skip(region_id, project, "", reason);
        }
    }
}
