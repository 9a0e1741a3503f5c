//! Desired vs actual membership comparison

use crate::models::HeartbeatState;
use std::collections::{BTreeMap, HashSet};

/// Heartbeat state of every machine seen for one group
///
/// Actual members are `Up`. Desired members missing from the actual list
/// are `Down`. Machines only present in the actual list are still `Up`;
/// only missing expected machines count as a problem. Duplicates in either
/// list collapse to a single entry.
pub fn heartbeat_states(
    desired: &[String],
    actual: &[String],
) -> BTreeMap<String, HeartbeatState> {
    let mut missing: HashSet<&str> = desired.iter().map(String::as_str).collect();
    let mut states = BTreeMap::new();

    for machine in actual {
        states.insert(machine.clone(), HeartbeatState::Up);
        missing.remove(machine.as_str());
    }

    for machine in missing {
        states.insert(machine.to_string(), HeartbeatState::Down);
    }

    states
}
