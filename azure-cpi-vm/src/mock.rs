//! In-memory provider and executor for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::deployment::DeploymentRequest;
use crate::error::{CpiError, Result};
use crate::executor::CommandOutput;
use crate::lun::lun_of;
use crate::traits::{DeploymentExecutor, ProviderApi};
use crate::types::{DataDisk, DataDiskOptions, PowerState, VmRecord};

type VmKey = (String, String);

/// Mock provider backend.
///
/// Keeps VM records in memory, keyed by `(deployment group, vm name)`.
/// Attaching a disk at a LUN that is already taken fails the same way the
/// real provider does, which makes LUN races observable in tests.
///
/// With a state file the records survive across processes: they are loaded
/// on construction and rewritten after every change.
pub struct MockProvider {
    vms: RwLock<HashMap<VmKey, VmRecord>>,
    mutations: RwLock<usize>,
    failure: RwLock<Option<String>>,
    attach_delay: Duration,
    state_file: Option<PathBuf>,
}

impl MockProvider {
    /// Create a new mock provider.
    pub fn new() -> Self {
        info!("Creating mock provider");
        Self {
            vms: RwLock::new(HashMap::new()),
            mutations: RwLock::new(0),
            failure: RwLock::new(None),
            attach_delay: Duration::from_millis(10),
            state_file: None,
        }
    }

    /// Create a mock provider backed by a JSON state file. A missing file
    /// starts out empty.
    pub fn with_state_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records: Vec<VmRecord> = if path.exists() {
            serde_json::from_slice(&std::fs::read(&path)?)?
        } else {
            Vec::new()
        };
        info!(path = %path.display(), vms = records.len(), "Loaded mock provider state");

        let provider = Self {
            state_file: Some(path),
            ..Self::new()
        };
        {
            let mut vms = provider.vms.write().map_err(|_| lock_poisoned())?;
            for vm in records {
                vms.insert((vm.deployment_group.clone(), vm.name.clone()), vm);
            }
        }
        Ok(provider)
    }

    /// Seed a VM record.
    pub fn insert_vm(&self, vm: VmRecord) -> Result<()> {
        let mut vms = self.vms.write().map_err(|_| lock_poisoned())?;
        vms.insert((vm.deployment_group.clone(), vm.name.clone()), vm);
        self.persist(&vms)
    }

    /// Seed a running, diskless VM.
    pub fn insert_running_vm(&self, deployment_group: &str, vm_name: &str) -> Result<()> {
        self.insert_vm(VmRecord {
            name: vm_name.to_string(),
            deployment_group: deployment_group.to_string(),
            deployment_name: deployment_group.to_string(),
            state: PowerState::Running,
            size: "Standard_A1".to_string(),
            data_disks: Vec::new(),
        })
    }

    /// Snapshot of a VM record.
    pub fn vm(&self, deployment_group: &str, vm_name: &str) -> Option<VmRecord> {
        self.vms
            .read()
            .ok()?
            .get(&key(deployment_group, vm_name))
            .cloned()
    }

    /// Number of state-changing calls that reached the provider.
    pub fn mutation_count(&self) -> usize {
        self.mutations.read().map(|m| *m).unwrap_or_default()
    }

    /// Make every following call fail with a provider error.
    pub fn fail_with(&self, message: impl Into<String>) {
        if let Ok(mut failure) = self.failure.write() {
            *failure = Some(message.into());
        }
    }

    fn check_failure(&self) -> Result<()> {
        let failure = self.failure.read().map_err(|_| lock_poisoned())?;
        match failure.as_ref() {
            Some(message) => Err(CpiError::Provider(message.clone())),
            None => Ok(()),
        }
    }

    fn record_mutation(&self) -> Result<()> {
        *self.mutations.write().map_err(|_| lock_poisoned())? += 1;
        Ok(())
    }

    fn update_vm<T>(
        &self,
        deployment_group: &str,
        vm_name: &str,
        f: impl FnOnce(&mut VmRecord) -> Result<T>,
    ) -> Result<T> {
        self.check_failure()?;
        self.record_mutation()?;

        let mut vms = self.vms.write().map_err(|_| lock_poisoned())?;
        let vm = vms
            .get_mut(&key(deployment_group, vm_name))
            .ok_or_else(|| not_found(deployment_group, vm_name))?;
        let value = f(vm)?;
        self.persist(&vms)?;
        Ok(value)
    }

    fn persist(&self, vms: &HashMap<VmKey, VmRecord>) -> Result<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };

        let mut records: Vec<&VmRecord> = vms.values().collect();
        records.sort_by(|a, b| {
            (&a.deployment_group, &a.name).cmp(&(&b.deployment_group, &b.name))
        });
        write_state(path, &serde_json::to_vec_pretty(&records)?)
    }
}

fn write_state(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn key(deployment_group: &str, vm_name: &str) -> VmKey {
    (deployment_group.to_string(), vm_name.to_string())
}

fn lock_poisoned() -> CpiError {
    CpiError::Internal("Lock poisoned".to_string())
}

fn not_found(deployment_group: &str, vm_name: &str) -> CpiError {
    CpiError::Provider(format!(
        "ResourceNotFound: role {} in hosted service {}",
        vm_name, deployment_group
    ))
}

#[async_trait]
impl ProviderApi for MockProvider {
    async fn get_vm(&self, deployment_group: &str, vm_name: &str) -> Result<Option<VmRecord>> {
        self.check_failure()?;
        let vms = self.vms.read().map_err(|_| lock_poisoned())?;
        Ok(vms.get(&key(deployment_group, vm_name)).cloned())
    }

    #[instrument(skip(self))]
    async fn start_vm(&self, deployment_group: &str, vm_name: &str) -> Result<()> {
        self.update_vm(deployment_group, vm_name, |vm| {
            vm.state = PowerState::Running;
            Ok(())
        })?;
        info!("Mock VM started");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn shutdown_vm(&self, deployment_group: &str, vm_name: &str) -> Result<()> {
        self.update_vm(deployment_group, vm_name, |vm| {
            vm.state = PowerState::Stopped;
            Ok(())
        })?;
        info!("Mock VM stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn restart_vm(&self, deployment_group: &str, vm_name: &str) -> Result<()> {
        self.update_vm(deployment_group, vm_name, |vm| {
            vm.state = PowerState::Running;
            Ok(())
        })?;
        info!("Mock VM restarted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_vm(&self, deployment_group: &str, vm_name: &str) -> Result<()> {
        self.check_failure()?;
        self.record_mutation()?;

        let mut vms = self.vms.write().map_err(|_| lock_poisoned())?;
        vms.remove(&key(deployment_group, vm_name))
            .ok_or_else(|| not_found(deployment_group, vm_name))?;
        self.persist(&vms)?;

        info!("Mock VM deleted");
        Ok(())
    }

    #[instrument(skip(self, options), fields(disk_name = %options.disk_name, lun = options.lun))]
    async fn add_data_disk(
        &self,
        deployment_group: &str,
        vm_name: &str,
        options: DataDiskOptions,
    ) -> Result<()> {
        // Simulate provider latency so unserialized callers would interleave.
        tokio::time::sleep(self.attach_delay).await;

        self.update_vm(deployment_group, vm_name, |vm| {
            for disk in &vm.data_disks {
                if lun_of(disk)? == options.lun {
                    return Err(CpiError::Provider(format!(
                        "LUN {} is already in use by disk {}",
                        options.lun, disk.name
                    )));
                }
            }

            vm.data_disks.push(DataDisk {
                name: options.disk_name.clone(),
                lun: options.lun.to_string(),
                host_caching: options.host_caching,
                label: options.label.clone(),
            });
            Ok(())
        })?;

        info!("Mock data disk attached");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_data_disk(
        &self,
        deployment_group: &str,
        deployment_name: &str,
        vm_name: &str,
        lun: u32,
    ) -> Result<()> {
        self.update_vm(deployment_group, vm_name, |vm| {
            if vm.deployment_name != deployment_name {
                return Err(CpiError::Provider(format!(
                    "ResourceNotFound: deployment {}",
                    deployment_name
                )));
            }

            let before = vm.data_disks.len();
            vm.data_disks.retain(|d| lun_of(d).map(|l| l != lun).unwrap_or(true));
            if vm.data_disks.len() == before {
                return Err(CpiError::Provider(format!("ResourceNotFound: DataDisks/{}", lun)));
            }
            Ok(())
        })?;

        info!("Mock data disk detached");
        Ok(())
    }
}

/// Mock provisioning executor.
///
/// Returns a fixed exit code and log, and records every submitted request.
/// When linked to a [`MockProvider`], a successful submission registers the
/// new VM there.
pub struct MockExecutor {
    exit_code: i32,
    log: String,
    provider: Option<Arc<MockProvider>>,
    requests: RwLock<Vec<DeploymentRequest>>,
}

impl MockExecutor {
    /// Executor whose deployments succeed.
    pub fn succeeding() -> Self {
        Self::with_result(0, "info:    group deployment create command OK\n")
    }

    /// Executor whose deployments exit with `exit_code` and `log`.
    pub fn with_result(exit_code: i32, log: impl Into<String>) -> Self {
        Self {
            exit_code,
            log: log.into(),
            provider: None,
            requests: RwLock::new(Vec::new()),
        }
    }

    /// Register successfully deployed VMs with `provider`.
    pub fn with_provider(mut self, provider: Arc<MockProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Requests submitted so far.
    pub fn requests(&self) -> Vec<DeploymentRequest> {
        self.requests.read().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DeploymentExecutor for MockExecutor {
    async fn submit(&self, request: &DeploymentRequest) -> Result<CommandOutput> {
        debug!(vm_name = %request.vm_name(), "Mock deployment submitted");
        self.requests
            .write()
            .map_err(|_| lock_poisoned())?
            .push(request.clone());

        if self.exit_code == 0 {
            if let Some(provider) = &self.provider {
                let d = &request.descriptor;
                provider.insert_vm(VmRecord {
                    name: d.vm_name.clone(),
                    deployment_group: d.domain_name.clone(),
                    deployment_name: d.domain_name.clone(),
                    state: PowerState::Running,
                    size: d.vm_size.clone(),
                    data_disks: Vec::new(),
                })?;
            }
        }

        Ok(CommandOutput {
            log: self.log.clone(),
            exit_code: self.exit_code,
        })
    }
}
