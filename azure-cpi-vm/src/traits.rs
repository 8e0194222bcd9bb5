//! Collaborator interfaces.
//!
//! The manager never talks to the provider directly; every external system
//! is injected behind one of these traits so tests can substitute doubles.

use async_trait::async_trait;

use crate::deployment::DeploymentRequest;
use crate::error::Result;
use crate::executor::CommandOutput;
use crate::types::{DataDiskOptions, VmRecord};

/// Provider control/query API.
///
/// VMs are addressed by deployment group (cloud service) and machine name.
/// Implementations report provider failures as
/// [`CpiError::Provider`](crate::CpiError::Provider); callers pass them on
/// unchanged.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    // =========================================================================
    // VM Lifecycle
    // =========================================================================

    /// Read a VM. Returns `None` if the provider has no such VM.
    async fn get_vm(&self, deployment_group: &str, vm_name: &str) -> Result<Option<VmRecord>>;

    /// Start a stopped VM.
    async fn start_vm(&self, deployment_group: &str, vm_name: &str) -> Result<()>;

    /// Shut a running VM down.
    async fn shutdown_vm(&self, deployment_group: &str, vm_name: &str) -> Result<()>;

    /// Restart a VM.
    async fn restart_vm(&self, deployment_group: &str, vm_name: &str) -> Result<()>;

    /// Delete a VM.
    async fn delete_vm(&self, deployment_group: &str, vm_name: &str) -> Result<()>;

    // =========================================================================
    // Data Disks
    // =========================================================================

    /// Attach a data disk.
    async fn add_data_disk(
        &self,
        deployment_group: &str,
        vm_name: &str,
        options: DataDiskOptions,
    ) -> Result<()>;

    /// Remove the data disk sub-resource
    /// `hostedservices/<group>/deployments/<deployment>/roles/<vm>/DataDisks/<lun>`.
    async fn delete_data_disk(
        &self,
        deployment_group: &str,
        deployment_name: &str,
        vm_name: &str,
        lun: u32,
    ) -> Result<()>;
}

/// Runs a deployment request to completion.
#[async_trait]
pub trait DeploymentExecutor: Send + Sync {
    /// Submit the request and wait for the provisioning run to finish.
    async fn submit(&self, request: &DeploymentRequest) -> Result<CommandOutput>;
}

/// Registry holding per-instance bootstrap settings.
pub trait Registry: Send + Sync {
    /// Endpoint URL the guest agent contacts on first boot.
    fn endpoint(&self) -> &str;
}

/// Storage account bookkeeping.
#[async_trait]
pub trait StorageAccounts: Send + Sync {
    /// Storage account new VMs are created in.
    async fn storage_account_name(&self) -> Result<String>;
}

/// Registry with a fixed endpoint.
#[derive(Debug, Clone)]
pub struct StaticRegistry {
    endpoint: String,
}

impl StaticRegistry {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl Registry for StaticRegistry {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Storage bookkeeping with one fixed account.
#[derive(Debug, Clone)]
pub struct StaticStorageAccount {
    name: String,
}

impl StaticStorageAccount {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl StorageAccounts for StaticStorageAccount {
    async fn storage_account_name(&self) -> Result<String> {
        Ok(self.name.clone())
    }
}
