//! Provisioning executor.
//!
//! Realizes a [`DeploymentRequest`] by running the provider CLI:
//!
//! ```text
//! azure config mode arm
//! azure group deployment create <resource-group> -n <vm-name> -f <template> -p <parameters-json>
//! ```
//!
//! Only the exit code decides success. Stdout and stderr are captured into
//! one log (stdout first) so a failed deployment can be reported in full.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::deployment::DeploymentRequest;
use crate::error::{CpiError, Result};
use crate::traits::DeploymentExecutor;

/// Guards the provider CLI's mode setting.
///
/// `azure config mode` rewrites per-user CLI state, so a mode switch and the
/// command that depends on it run under this lock, process-wide.
pub(crate) static CLI_MODE_LOCK: Lazy<tokio::sync::Mutex<()>> =
    Lazy::new(|| tokio::sync::Mutex::new(()));

/// Default deployment timeout (30 minutes).
pub const DEFAULT_PROVISIONING_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Output of a finished subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Stdout followed by stderr
    pub log: String,
    /// Process exit code (-1 when killed by a signal)
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Provider CLI binary
    pub program: String,
    /// Deployment template passed with `-f`
    pub template_path: PathBuf,
    /// Upper bound for one deployment
    pub timeout: Duration,
    /// Run `<program> config mode arm` before each deployment
    pub arm_mode: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            program: "azure".to_string(),
            template_path: PathBuf::from("bosh_deploy_vm.json"),
            timeout: DEFAULT_PROVISIONING_TIMEOUT,
            arm_mode: true,
        }
    }
}

/// Executor backed by the provider CLI.
pub struct CliExecutor {
    config: ExecutorConfig,
}

impl CliExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Arguments of the deployment command.
    pub fn deployment_args(&self, request: &DeploymentRequest) -> Result<Vec<String>> {
        let parameters = serde_json::to_string(&request.descriptor.parameters()?)?;

        Ok(vec![
            "group".to_string(),
            "deployment".to_string(),
            "create".to_string(),
            request.resource_group.clone(),
            "-n".to_string(),
            request.vm_name().to_string(),
            "-f".to_string(),
            self.config.template_path.display().to_string(),
            "-p".to_string(),
            parameters,
        ])
    }

    /// Switch the CLI to resource-manager mode. Failures are logged only; the
    /// deployment itself reports any real problem.
    async fn switch_to_arm_mode(&self) {
        let run = run_command(&self.config.program, ["config", "mode", "arm"]);
        match tokio::time::timeout(self.config.timeout, run).await {
            Ok(Ok(output)) if output.success() => debug!("CLI switched to arm mode"),
            Ok(Ok(output)) => warn!(
                exit_code = output.exit_code,
                log = %output.log,
                "Failed to switch CLI to arm mode"
            ),
            Ok(Err(e)) => warn!(error = %e, "Failed to switch CLI to arm mode"),
            Err(_) => warn!("Timed out switching CLI to arm mode"),
        }
    }
}

#[async_trait]
impl DeploymentExecutor for CliExecutor {
    #[instrument(
        skip(self, request),
        fields(vm_name = %request.vm_name(), resource_group = %request.resource_group)
    )]
    async fn submit(&self, request: &DeploymentRequest) -> Result<CommandOutput> {
        let _mode = CLI_MODE_LOCK.lock().await;
        if self.config.arm_mode {
            self.switch_to_arm_mode().await;
        }

        let args = self.deployment_args(request)?;
        let start = Instant::now();
        info!(program = %self.config.program, "Submitting deployment");

        let run = run_command(&self.config.program, &args);
        let output = tokio::time::timeout(self.config.timeout, run)
            .await
            .map_err(|_| CpiError::ProvisioningTimedOut {
                vm_name: request.vm_name().to_string(),
                timeout_secs: self.config.timeout.as_secs(),
            })??;

        info!(
            exit_code = output.exit_code,
            duration_ms = start.elapsed().as_millis() as u64,
            "Deployment finished"
        );
        Ok(output)
    }
}

/// Run a program to completion and capture its output.
///
/// The child is killed if the returned future is dropped, so wrapping the
/// call in a timeout bounds it.
pub(crate) async fn run_command<I, S>(program: &str, args: I) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            CpiError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to run {}: {}", program, e),
            ))
        })?;

    // Drain both pipes concurrently so neither can fill up and stall the child.
    let (stdout, stderr) = tokio::join!(
        read_all(child.stdout.take()),
        read_all(child.stderr.take())
    );
    let status = child.wait().await?;

    let mut log = String::from_utf8_lossy(&stdout?).into_owned();
    log.push_str(&String::from_utf8_lossy(&stderr?));

    Ok(CommandOutput {
        log,
        exit_code: status.code().unwrap_or(-1),
    })
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::deployment::build_request;
    use crate::types::{CloudOptions, NetworkConfig, ResourcePool};
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn request() -> DeploymentRequest {
        let cloud = CloudOptions {
            ssh_user: "vcap".to_string(),
            location: "eastus".to_string(),
            password: "x".to_string(),
            vm_authorized_keys: None,
            resource_group_name: "rg1".to_string(),
        };
        let network = NetworkConfig {
            domain_name: "dg1".to_string(),
            virtual_network_name: "vnet1".to_string(),
            subnet_name: "sub1".to_string(),
            ip: "10.0.0.4".to_string(),
            tcp_endpoints: "22:22".to_string(),
            ..Default::default()
        };
        let pool = ResourcePool {
            instance_type: "Standard_A1".to_string(),
        };
        build_request(
            "abc",
            "stemcell-1",
            &cloud,
            &network,
            &pool,
            "storage1".to_string(),
            "http://registry",
        )
        .unwrap()
    }

    fn script(dir: &Path, body: &str) -> String {
        let path = dir.join("fake-cli");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn executor(program: String, timeout: Duration) -> CliExecutor {
        CliExecutor::new(ExecutorConfig {
            program,
            template_path: PathBuf::from("/etc/cpi/bosh_deploy_vm.json"),
            timeout,
            arm_mode: false,
        })
    }

    #[test]
    fn test_deployment_args() {
        let executor = executor("azure".to_string(), DEFAULT_PROVISIONING_TIMEOUT);
        let args = executor.deployment_args(&request()).unwrap();

        assert_eq!(
            &args[..8],
            &[
                "group",
                "deployment",
                "create",
                "rg1",
                "-n",
                "bosh-vm-abc",
                "-f",
                "/etc/cpi/bosh_deploy_vm.json",
            ]
        );
        assert_eq!(args[8], "-p");
        let params: serde_json::Value = serde_json::from_str(&args[9]).unwrap();
        assert_eq!(params["vm_name"]["value"], "bosh-vm-abc");
    }

    #[tokio::test]
    async fn test_captures_stdout_then_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "echo out\necho err >&2\nexit 3");

        let output = executor(program, Duration::from_secs(10)).submit(&request()).await.unwrap();
        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
        assert_eq!(output.log, "out\nerr\n");
    }

    #[tokio::test]
    async fn test_success_is_exit_code_only() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "echo 'error: something looked wrong'\nexit 0");

        let output = executor(program, Duration::from_secs(10)).submit(&request()).await.unwrap();
        assert!(output.success());
        assert!(output.log.contains("error"));
    }

    #[tokio::test]
    async fn test_arguments_reach_program() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "echo \"$4 $6\"");

        let output = executor(program, Duration::from_secs(10)).submit(&request()).await.unwrap();
        assert_eq!(output.log.trim(), "rg1 bosh-vm-abc");
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "sleep 5");

        let err = executor(program, Duration::from_millis(200))
            .submit(&request())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CpiError::ProvisioningTimedOut { ref vm_name, .. } if vm_name == "bosh-vm-abc"
        ));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = executor("/nonexistent/azure".to_string(), Duration::from_secs(1))
            .submit(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, CpiError::Io(_)));
    }
}
