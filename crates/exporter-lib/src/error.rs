//! Error types shared across the exporter

use std::fmt;
use thiserror::Error;

/// Failure talking to the log service directory API
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("log service returned {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("invalid endpoint for region {region}: {reason}")]
    Endpoint { region: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Raw region identifier without a second `-` separated part
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionLabelError {
    #[error("malformed region identifier: {0}")]
    Malformed(String),
}

/// Why a unit of work was abandoned during a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// No directory client could be built for the region
    Client,
    /// Region identifier has no label component
    MalformedRegion,
    ListMachineGroups,
    DesiredMembership,
    ActualMembership,
    /// Group task panicked or was aborted
    Task,
}

impl SkipReason {
    /// Value used for the `reason` metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Client => "client",
            SkipReason::MalformedRegion => "malformed_region",
            SkipReason::ListMachineGroups => "list_machine_groups",
            SkipReason::DesiredMembership => "desired_membership",
            SkipReason::ActualMembership => "actual_membership",
            SkipReason::Task => "task",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
