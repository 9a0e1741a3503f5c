//! Core data models for heartbeat reconciliation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A (region, project) pair to reconcile
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    pub region: String,
    pub project: String,
}

impl Target {
    pub fn new(region: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            project: project.into(),
        }
    }
}

/// Region identifier -> ordered project names
///
/// Regions iterate in sorted order so passes are deterministic in logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetList {
    regions: BTreeMap<String, Vec<String>>,
}

impl TargetList {
    pub fn new(regions: BTreeMap<String, Vec<String>>) -> Self {
        Self { regions }
    }

    /// Regions with their configured projects
    pub fn regions(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.regions
            .iter()
            .map(|(region, projects)| (region.as_str(), projects.as_slice()))
    }

    /// Flattened (region, project) targets
    pub fn targets(&self) -> impl Iterator<Item = Target> + '_ {
        self.regions.iter().flat_map(|(region, projects)| {
            projects.iter().map(move |project| Target::new(region, project))
        })
    }
}

impl From<BTreeMap<String, Vec<String>>> for TargetList {
    fn from(regions: BTreeMap<String, Vec<String>>) -> Self {
        Self::new(regions)
    }
}

/// Heartbeat state of a single machine within a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatState {
    Down,
    Up,
}

impl HeartbeatState {
    /// Gauge value exposed for this state
    pub fn as_gauge(self) -> f64 {
        match self {
            HeartbeatState::Up => 1.0,
            HeartbeatState::Down => 0.0,
        }
    }
}

/// Label tuple of one heartbeat series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeartbeatLabels {
    pub machine: String,
    pub region: String,
    pub project: String,
    pub machine_group: String,
}

/// One (machine, region label, project, group) -> state data point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatObservation {
    pub labels: HeartbeatLabels,
    pub state: HeartbeatState,
}
