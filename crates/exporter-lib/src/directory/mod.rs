//! Machine group directory of the log service
//!
//! The reconciliation engine only sees the [`DirectoryClient`] trait. The
//! production implementation talks to the SLS REST API over HTTPS; tests
//! substitute an in-memory directory.

mod signer;
mod sls;

pub use signer::{Credentials, RequestSigner};
pub use sls::{SlsClient, SlsClientConfig, SlsClientFactory, DEFAULT_ENDPOINT_TEMPLATE, PAGE_SIZE};

use crate::error::DirectoryError;
use std::sync::Arc;

pub use async_trait::async_trait;

/// Read operations against the machine group directory of one region
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Names of all machine groups in a project
    async fn list_machine_groups(&self, project: &str) -> Result<Vec<String>, DirectoryError>;

    /// Machines administratively configured as members of a group
    async fn get_machine_group_membership(
        &self,
        project: &str,
        group: &str,
    ) -> Result<Vec<String>, DirectoryError>;

    /// Machines currently registered as heartbeating for a group
    async fn list_actual_machines(
        &self,
        project: &str,
        group: &str,
    ) -> Result<Vec<String>, DirectoryError>;
}

/// Builds one directory client per region
pub trait DirectoryClientFactory: Send + Sync {
    fn client_for_region(&self, region: &str) -> Result<Arc<dyn DirectoryClient>, DirectoryError>;
}
