//! Provider control plane driven through the `azure` CLI in service
//! management (asm) mode.
//!
//! | Operation        | Command                                              |
//! |------------------|------------------------------------------------------|
//! | get              | `azure vm show <vm> -d <group> --json`               |
//! | start            | `azure vm start <vm> -d <group>`                     |
//! | shutdown         | `azure vm shutdown <vm> -d <group>`                  |
//! | restart          | `azure vm restart <vm> -d <group>`                   |
//! | delete           | `azure vm delete <vm> -d <group> -q`                 |
//! | add data disk    | `azure vm disk attach <vm> <disk> -d <group> ...`    |
//! | delete data disk | `azure vm disk detach <vm> <lun> -d <group>`         |

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{CpiError, Result};
use crate::executor::{run_command, CommandOutput, CLI_MODE_LOCK};
use crate::traits::ProviderApi;
use crate::types::{DataDisk, DataDiskOptions, HostCaching, PowerState, VmRecord};

/// Default timeout for one control-plane command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// CLI provider configuration.
#[derive(Debug, Clone)]
pub struct AzureCliConfig {
    /// Provider CLI binary
    pub program: String,
    /// Upper bound for one command
    pub timeout: Duration,
}

impl Default for AzureCliConfig {
    fn default() -> Self {
        Self {
            program: "azure".to_string(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// [`ProviderApi`] implementation backed by the provider CLI.
pub struct AzureCliProvider {
    config: AzureCliConfig,
}

impl AzureCliProvider {
    pub fn new(config: AzureCliConfig) -> Self {
        Self { config }
    }

    async fn run(&self, args: &[String]) -> Result<CommandOutput> {
        debug!(program = %self.config.program, args = ?args, "Running provider command");

        tokio::time::timeout(self.config.timeout, run_command(&self.config.program, args))
            .await
            .map_err(|_| {
                CpiError::Provider(format!(
                    "'{} {}' timed out after {}s",
                    self.config.program,
                    args.join(" "),
                    self.config.timeout.as_secs()
                ))
            })?
    }

    /// Switch to asm mode and run one command, holding the CLI mode lock
    /// across both.
    async fn run_in_asm_mode(&self, args: &[String]) -> Result<CommandOutput> {
        let _mode = CLI_MODE_LOCK.lock().await;
        self.switch_to_asm_mode().await;
        self.run(args).await
    }

    /// Run a state-changing command; a non-zero exit is a provider error.
    async fn run_checked(&self, args: Vec<String>) -> Result<()> {
        let output = self.run_in_asm_mode(&args).await?;
        if !output.success() {
            return Err(provider_error(&args, &output));
        }
        Ok(())
    }

    async fn switch_to_asm_mode(&self) {
        match self.run(&strings(&["config", "mode", "asm"])).await {
            Ok(output) if output.success() => {}
            Ok(output) => warn!(log = %output.log, "Failed to switch CLI to asm mode"),
            Err(e) => warn!(error = %e, "Failed to switch CLI to asm mode"),
        }
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

fn vm_args(verb: &str, deployment_group: &str, vm_name: &str) -> Vec<String> {
    strings(&["vm", verb, vm_name, "-d", deployment_group])
}

fn provider_error(args: &[String], output: &CommandOutput) -> CpiError {
    CpiError::Provider(format!(
        "'{}' exited with code {}: {}",
        args.join(" "),
        output.exit_code,
        output.log.trim()
    ))
}

fn is_not_found(log: &str) -> bool {
    let log = log.to_ascii_lowercase();
    ["not found", "resourcenotfound", "no vms found", "does not exist"]
        .iter()
        .any(|pattern| log.contains(pattern))
}

/// VM as printed by `azure vm show --json`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct CliVm {
    #[serde(rename = "VMName")]
    vm_name: String,
    deployment_name: String,
    instance_status: String,
    instance_size: String,
    data_disks: Vec<CliDataDisk>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CliDataDisk {
    name: String,
    logical_unit_number: Option<serde_json::Value>,
    host_caching: Option<HostCaching>,
    label: Option<String>,
}

impl CliVm {
    fn into_record(self, deployment_group: &str) -> VmRecord {
        let state = match self.instance_status.as_str() {
            "ReadyRole" | "Running" => PowerState::Running,
            "StoppedVM" | "StoppedDeallocated" | "Stopped" => PowerState::Stopped,
            _ => PowerState::Unknown,
        };

        VmRecord {
            name: self.vm_name,
            deployment_group: deployment_group.to_string(),
            deployment_name: self.deployment_name,
            state,
            size: self.instance_size,
            data_disks: self
                .data_disks
                .into_iter()
                .map(|d| DataDisk {
                    name: d.name,
                    lun: match d.logical_unit_number {
                        Some(serde_json::Value::String(s)) => s,
                        Some(serde_json::Value::Number(n)) => n.to_string(),
                        _ => String::new(),
                    },
                    host_caching: d.host_caching.unwrap_or_default(),
                    label: d.label.unwrap_or_default(),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl ProviderApi for AzureCliProvider {
    #[instrument(skip(self))]
    async fn get_vm(&self, deployment_group: &str, vm_name: &str) -> Result<Option<VmRecord>> {
        let mut args = vm_args("show", deployment_group, vm_name);
        args.push("--json".to_string());
        let output = self.run_in_asm_mode(&args).await?;

        if !output.success() {
            if is_not_found(&output.log) {
                return Ok(None);
            }
            return Err(provider_error(&args, &output));
        }

        let vm: CliVm = serde_json::from_str(output.log.trim()).map_err(|e| {
            CpiError::Provider(format!("Unexpected output from '{}': {}", args.join(" "), e))
        })?;
        if vm.vm_name.is_empty() {
            return Ok(None);
        }

        Ok(Some(vm.into_record(deployment_group)))
    }

    #[instrument(skip(self))]
    async fn start_vm(&self, deployment_group: &str, vm_name: &str) -> Result<()> {
        self.run_checked(vm_args("start", deployment_group, vm_name)).await?;
        info!("VM started");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn shutdown_vm(&self, deployment_group: &str, vm_name: &str) -> Result<()> {
        self.run_checked(vm_args("shutdown", deployment_group, vm_name)).await?;
        info!("VM shut down");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn restart_vm(&self, deployment_group: &str, vm_name: &str) -> Result<()> {
        self.run_checked(vm_args("restart", deployment_group, vm_name)).await?;
        info!("VM restarted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_vm(&self, deployment_group: &str, vm_name: &str) -> Result<()> {
        let mut args = vm_args("delete", deployment_group, vm_name);
        args.push("-q".to_string());
        self.run_checked(args).await?;
        info!("VM deleted");
        Ok(())
    }

    #[instrument(skip(self, options), fields(disk_name = %options.disk_name, lun = options.lun))]
    async fn add_data_disk(
        &self,
        deployment_group: &str,
        vm_name: &str,
        options: DataDiskOptions,
    ) -> Result<()> {
        self.run_checked(attach_args(deployment_group, vm_name, &options)).await?;
        info!("Data disk attached");
        Ok(())
    }

    /// The CLI resolves the deployment from the deployment group itself, so
    /// `deployment_name` only appears in the span.
    #[instrument(skip(self))]
    async fn delete_data_disk(
        &self,
        deployment_group: &str,
        deployment_name: &str,
        vm_name: &str,
        lun: u32,
    ) -> Result<()> {
        self.run_checked(detach_args(deployment_group, vm_name, lun)).await?;
        info!("Data disk detached");
        Ok(())
    }
}

fn attach_args(deployment_group: &str, vm_name: &str, options: &DataDiskOptions) -> Vec<String> {
    let lun = options.lun.to_string();
    strings(&[
        "vm",
        "disk",
        "attach",
        vm_name,
        options.disk_name.as_str(),
        "-d",
        deployment_group,
        "--lun",
        lun.as_str(),
        "--host-caching",
        options.host_caching.as_str(),
        "--label",
        options.label.as_str(),
    ])
}

/// `vm disk detach` addresses the disk by role and LUN within the group.
fn detach_args(deployment_group: &str, vm_name: &str, lun: u32) -> Vec<String> {
    let lun = lun.to_string();
    strings(&["vm", "disk", "detach", vm_name, lun.as_str(), "-d", deployment_group])
}
