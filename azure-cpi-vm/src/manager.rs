//! VM lifecycle facade.
//!
//! ```text
//! absent ──create──▶ provisioning ──success──▶ running ◀──start── stopped
//!                         │                       │                 ▲
//!                      failure                    └────shutdown─────┘
//!                         ▼
//!                       absent          running/stopped ──delete──▶ absent
//! ```
//!
//! A failed create leaves nothing to repair; the caller resubmits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, instrument};

use crate::deployment::{build_request, vm_name_for};
use crate::error::{CpiError, Result};
use crate::identity::{self, InstanceId};
use crate::lun::{device_path, lun_of, next_lun};
use crate::traits::{DeploymentExecutor, ProviderApi, Registry, StorageAccounts};
use crate::types::{
    CloudOptions, DataDiskOptions, HostCaching, NetworkConfig, ResourcePool, VmRecord,
};

/// Label given to every data disk the CPI attaches.
pub const DISK_LABEL: &str = "bosh";

/// Caching policy for attached data disks.
pub const DISK_HOST_CACHING: HostCaching = HostCaching::ReadOnly;

/// Stable operation surface for VM lifecycle and disk management.
pub struct VmManager {
    provider: Arc<dyn ProviderApi>,
    executor: Arc<dyn DeploymentExecutor>,
    registry: Arc<dyn Registry>,
    storage: Arc<dyn StorageAccounts>,
    /// Serializes disk attach/detach per instance id. An entry lives only
    /// while an operation on that instance is in flight.
    disk_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl VmManager {
    pub fn new(
        provider: Arc<dyn ProviderApi>,
        executor: Arc<dyn DeploymentExecutor>,
        registry: Arc<dyn Registry>,
        storage: Arc<dyn StorageAccounts>,
    ) -> Self {
        Self {
            provider,
            executor,
            registry,
            storage,
            disk_locks: Mutex::new(HashMap::new()),
        }
    }

    // =========================================================================
    // VM Lifecycle
    // =========================================================================

    /// Create a VM and return its instance id.
    #[instrument(skip_all, fields(uuid = %uuid, image = %image))]
    pub async fn create(
        &self,
        uuid: &str,
        image: &str,
        cloud: &CloudOptions,
        network: &NetworkConfig,
        resource_pool: &ResourcePool,
    ) -> Result<String> {
        let storage_account_name = self.storage.storage_account_name().await?;
        let request = build_request(
            uuid,
            image,
            cloud,
            network,
            resource_pool,
            storage_account_name,
            self.registry.endpoint(),
        )
        .map_err(|e| {
            e.during("create", &identity::encode(&network.domain_name, &vm_name_for(uuid)))
        })?;
        let vm_name = request.vm_name().to_string();

        info!(
            vm_name = %vm_name,
            deployment_group = %request.descriptor.domain_name,
            "Creating VM"
        );
        let output = self.executor.submit(&request).await?;

        if !output.success() {
            error!(
                vm_name = %vm_name,
                exit_code = output.exit_code,
                log = %output.log,
                "Failed to create VM"
            );
            return Err(CpiError::ProvisioningFailed {
                vm_name,
                exit_code: output.exit_code,
                log: output.log,
            });
        }
        debug!(vm_name = %vm_name, log = %output.log, "Create VM");

        let instance_id = identity::encode(&request.descriptor.domain_name, &vm_name);
        info!(instance_id = %instance_id, "VM created");
        Ok(instance_id)
    }

    /// Look a VM up by instance id.
    #[instrument(skip(self))]
    pub async fn find(&self, instance_id: &str) -> Result<Option<VmRecord>> {
        let id = decode("find", instance_id)?;
        self.provider.get_vm(&id.deployment_group, &id.vm_name).await
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, instance_id: &str) -> Result<()> {
        let id = decode("delete", instance_id)?;
        info!("Deleting VM");
        self.provider.delete_vm(&id.deployment_group, &id.vm_name).await
    }

    #[instrument(skip(self))]
    pub async fn reboot(&self, instance_id: &str) -> Result<()> {
        let id = decode("reboot", instance_id)?;
        info!("Rebooting VM");
        self.provider.restart_vm(&id.deployment_group, &id.vm_name).await
    }

    #[instrument(skip(self))]
    pub async fn start(&self, instance_id: &str) -> Result<()> {
        let id = decode("start", instance_id)?;
        info!("Starting VM");
        self.provider.start_vm(&id.deployment_group, &id.vm_name).await
    }

    #[instrument(skip(self))]
    pub async fn shutdown(&self, instance_id: &str) -> Result<()> {
        let id = decode("shutdown", instance_id)?;
        info!("Shutting down VM");
        self.provider.shutdown_vm(&id.deployment_group, &id.vm_name).await
    }

    // =========================================================================
    // Data Disks
    // =========================================================================

    /// Attach a data disk at the next free LUN and return its device path.
    #[instrument(skip(self))]
    pub async fn attach_disk(&self, instance_id: &str, disk_name: &str) -> Result<String> {
        decode("attach_disk", instance_id)?;

        let lock = self.disk_lock(instance_id)?;
        let result = {
            let _guard = lock.lock().await;
            self.attach_disk_locked(instance_id, disk_name).await
        };
        self.release_disk_lock(instance_id, lock)?;
        result
    }

    async fn attach_disk_locked(&self, instance_id: &str, disk_name: &str) -> Result<String> {
        let (id, vm) = self.require_vm("attach_disk", instance_id).await?;
        let lun = next_lun(&vm.data_disks).map_err(|e| e.during("attach_disk", instance_id))?;
        let path = device_path(lun).map_err(|e| e.during("attach_disk", instance_id))?;

        let options = DataDiskOptions {
            import: true,
            disk_name: disk_name.to_string(),
            host_caching: DISK_HOST_CACHING,
            label: DISK_LABEL.to_string(),
            lun,
        };
        self.provider
            .add_data_disk(&id.deployment_group, &id.vm_name, options)
            .await?;

        info!(lun = lun, device = %path, "Disk attached");
        Ok(path)
    }

    /// Detach a data disk by name.
    #[instrument(skip(self))]
    pub async fn detach_disk(&self, instance_id: &str, disk_name: &str) -> Result<()> {
        decode("detach_disk", instance_id)?;

        let lock = self.disk_lock(instance_id)?;
        let result = {
            let _guard = lock.lock().await;
            self.detach_disk_locked(instance_id, disk_name).await
        };
        self.release_disk_lock(instance_id, lock)?;
        result
    }

    async fn detach_disk_locked(&self, instance_id: &str, disk_name: &str) -> Result<()> {
        let (id, vm) = self.require_vm("detach_disk", instance_id).await?;
        let disk = vm
            .data_disks
            .iter()
            .find(|d| d.name == disk_name)
            .ok_or_else(|| CpiError::DiskNotAttached {
                operation: "detach_disk",
                instance_id: instance_id.to_string(),
                disk_name: disk_name.to_string(),
            })?;
        let lun = lun_of(disk).map_err(|e| e.during("detach_disk", instance_id))?;

        self.provider
            .delete_data_disk(&id.deployment_group, &vm.deployment_name, &id.vm_name, lun)
            .await?;

        info!(lun = lun, "Disk detached");
        Ok(())
    }

    /// Names of the attached data disks, in provider order.
    #[instrument(skip(self))]
    pub async fn get_disks(&self, instance_id: &str) -> Result<Vec<String>> {
        let (_, vm) = self.require_vm("get_disks", instance_id).await?;
        Ok(vm.data_disks.into_iter().map(|d| d.name).collect())
    }

    /// Device path of an attached data disk.
    #[instrument(skip(self))]
    pub async fn volume_name(&self, instance_id: &str, disk_name: &str) -> Result<String> {
        let (_, vm) = self.require_vm("volume_name", instance_id).await?;
        let disk = vm
            .data_disks
            .iter()
            .find(|d| d.name == disk_name)
            .ok_or_else(|| CpiError::DiskNotAttached {
                operation: "volume_name",
                instance_id: instance_id.to_string(),
                disk_name: disk_name.to_string(),
            })?;
        lun_of(disk)
            .and_then(device_path)
            .map_err(|e| e.during("volume_name", instance_id))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn require_vm(
        &self,
        operation: &'static str,
        instance_id: &str,
    ) -> Result<(InstanceId, VmRecord)> {
        let id = decode(operation, instance_id)?;
        let vm = self
            .provider
            .get_vm(&id.deployment_group, &id.vm_name)
            .await?
            .ok_or_else(|| CpiError::InstanceNotFound {
                operation,
                instance_id: instance_id.to_string(),
            })?;
        Ok((id, vm))
    }

    fn disk_lock(&self, instance_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self.disk_locks.lock().map_err(|_| lock_poisoned())?;
        Ok(locks.entry(instance_id.to_string()).or_default().clone())
    }

    /// Drop the map entry once no other operation holds or waits on it.
    fn release_disk_lock(
        &self,
        instance_id: &str,
        lock: Arc<tokio::sync::Mutex<()>>,
    ) -> Result<()> {
        let mut locks = self.disk_locks.lock().map_err(|_| lock_poisoned())?;
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(instance_id);
        }
        Ok(())
    }
}

fn decode(operation: &'static str, instance_id: &str) -> Result<InstanceId> {
    identity::decode(instance_id).map_err(|e| e.during(operation, instance_id))
}

fn lock_poisoned() -> CpiError {
    CpiError::Internal("Lock poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockExecutor, MockProvider};
    use crate::traits::{StaticRegistry, StaticStorageAccount};

    fn manager(provider: Arc<MockProvider>) -> VmManager {
        VmManager::new(
            provider.clone(),
            Arc::new(MockExecutor::succeeding().with_provider(provider)),
            Arc::new(StaticRegistry::new("http://registry:25777")),
            Arc::new(StaticStorageAccount::new("storage1")),
        )
    }

    #[tokio::test]
    async fn test_find_missing_vm() {
        let manager = manager(Arc::new(MockProvider::new()));
        assert!(manager.find("dg1&bosh-vm-x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_id_rejected() {
        let manager = manager(Arc::new(MockProvider::new()));
        assert!(matches!(
            manager.start("garbage").await,
            Err(CpiError::MalformedIdentity { operation: "start", .. })
        ));
        assert!(matches!(
            manager.attach_disk("garbage", "d0").await,
            Err(CpiError::MalformedIdentity { operation: "attach_disk", .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_disk_operations_leave_no_lock_entries() {
        let provider = Arc::new(MockProvider::new());
        provider.insert_running_vm("dg1", "vm1").unwrap();
        let manager = manager(provider);

        for i in 0..10 {
            let missing = format!("dg1&bosh-vm-{}", i);
            assert!(manager.attach_disk("garbage", "d0").await.is_err());
            assert!(manager.attach_disk(&missing, "d0").await.is_err());
            assert!(manager.detach_disk(&missing, "d0").await.is_err());
        }
        manager.attach_disk("dg1&vm1", "d0").await.unwrap();
        manager.detach_disk("dg1&vm1", "d0").await.unwrap();

        assert!(manager.disk_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attach_to_missing_vm() {
        let manager = manager(Arc::new(MockProvider::new()));
        let err = manager.attach_disk("dg1&bosh-vm-x", "d0").await.unwrap_err();
        assert!(matches!(err, CpiError::InstanceNotFound { operation: "attach_disk", .. }));
    }

    #[tokio::test]
    async fn test_attach_uses_fixed_policy() {
        let provider = Arc::new(MockProvider::new());
        provider.insert_running_vm("dg1", "vm1").unwrap();
        let manager = manager(provider.clone());

        assert_eq!(manager.attach_disk("dg1&vm1", "d0").await.unwrap(), "/dev/sdc");

        let disk = &provider.vm("dg1", "vm1").unwrap().data_disks[0];
        assert_eq!(disk.host_caching, HostCaching::ReadOnly);
        assert_eq!(disk.label, "bosh");
    }

    #[tokio::test]
    async fn test_attach_beyond_last_lun() {
        let provider = Arc::new(MockProvider::new());
        let mut vm = VmRecord {
            name: "vm1".to_string(),
            deployment_group: "dg1".to_string(),
            deployment_name: "dg1".to_string(),
            state: crate::types::PowerState::Running,
            size: "Standard_A1".to_string(),
            data_disks: Vec::new(),
        };
        for lun in 0..=crate::lun::MAX_LUN {
            vm.data_disks.push(crate::types::DataDisk::new(format!("d{}", lun), lun));
        }
        provider.insert_vm(vm).unwrap();
        let manager = manager(provider.clone());

        let err = manager.attach_disk("dg1&vm1", "one-too-many").await.unwrap_err();
        match err {
            CpiError::InvalidLun { operation, instance_id, .. } => {
                assert_eq!(operation, "attach_disk");
                assert_eq!(instance_id, "dg1&vm1");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(provider.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_volume_name() {
        let provider = Arc::new(MockProvider::new());
        provider.insert_running_vm("dg1", "vm1").unwrap();
        let manager = manager(provider);

        manager.attach_disk("dg1&vm1", "d0").await.unwrap();
        manager.attach_disk("dg1&vm1", "d1").await.unwrap();

        assert_eq!(manager.volume_name("dg1&vm1", "d1").await.unwrap(), "/dev/sdd");
        assert!(matches!(
            manager.volume_name("dg1&vm1", "nope").await,
            Err(CpiError::DiskNotAttached { operation: "volume_name", .. })
        ));
    }
}
