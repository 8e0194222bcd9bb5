//! Configuration management for the CPI.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use azure_cpi_vm::{AzureCliConfig, CloudOptions, ExecutorConfig};

use crate::cli::Args;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/azure-cpi/cpi.yaml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cloud-wide VM options
    pub azure: CloudOptions,
    /// Registry collaborator
    pub registry: RegistryConfig,
    /// Storage collaborator
    pub storage: StorageConfig,
    /// Provisioning subprocess settings
    pub provisioning: ProvisioningConfig,
    /// Logging settings
    pub logging: LoggingConfig,
    /// Use the mock provider
    pub dev: bool,
    /// State file of the mock provider (defaults to the temp dir)
    pub dev_state_file: Option<String>,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            bail!("Config file not found: {}", path.display());
        }

        load_file(path)
    }

    /// Load the explicit config file, or the default one if it exists, or
    /// fall back to defaults. Returns the config and where it came from.
    ///
    /// A config file that exists but cannot be read or parsed is an error.
    pub fn resolve(explicit: Option<&str>, default_path: &str) -> Result<(Self, String)> {
        let path = match explicit {
            Some(path) => path,
            None if Path::new(default_path).exists() => default_path,
            None => return Ok((Self::default(), "defaults".to_string())),
        };

        let config = Self::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?;
        Ok((config, path.to_string()))
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }

        if let Some(ref format) = args.log_format {
            self.logging.format = format.clone();
        }

        if let Some(ref program) = args.azure_cli {
            self.provisioning.program = program.clone();
        }

        if let Some(ref template) = args.template {
            self.provisioning.template_path = template.clone();
        }

        if let Some(timeout) = args.timeout_secs {
            self.provisioning.timeout_secs = timeout;
        }

        if args.dev {
            self.dev = true;
        }

        if let Some(ref state) = args.dev_state {
            self.dev_state_file = Some(state.clone());
        }

        self
    }

    /// Check the settings `create` depends on.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("azure.ssh_user", &self.azure.ssh_user),
            ("azure.location", &self.azure.location),
            ("azure.password", &self.azure.password),
            ("azure.resource_group_name", &self.azure.resource_group_name),
            ("registry.endpoint", &self.registry.endpoint),
            ("storage.account_name", &self.storage.account_name),
            ("provisioning.program", &self.provisioning.program),
            ("provisioning.template_path", &self.provisioning.template_path),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            bail!("Missing required configuration: {}", missing.join(", "));
        }

        if self.provisioning.timeout_secs == 0 || self.provisioning.command_timeout_secs == 0 {
            bail!("Provisioning timeouts must be greater than zero");
        }

        Ok(())
    }

    /// Settings for the provisioning executor.
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            program: self.provisioning.program.clone(),
            template_path: self.provisioning.template_path.clone().into(),
            timeout: Duration::from_secs(self.provisioning.timeout_secs),
            arm_mode: self.provisioning.arm_mode,
        }
    }

    /// Where the development-mode provider persists its VMs.
    pub fn dev_state_path(&self) -> PathBuf {
        match &self.dev_state_file {
            Some(path) => PathBuf::from(path),
            None => std::env::temp_dir().join("azure-cpi-dev-state.json"),
        }
    }

    /// Settings for the CLI-backed provider.
    pub fn provider_config(&self) -> AzureCliConfig {
        AzureCliConfig {
            program: self.provisioning.program.clone(),
            timeout: Duration::from_secs(self.provisioning.command_timeout_secs),
        }
    }
}

/// Read a YAML (or JSON) file into `T`.
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse file: {}", path.display()))
}

/// Registry collaborator configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Endpoint URL handed to the guest agent
    pub endpoint: String,
}

/// Storage collaborator configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage account new VMs are placed in
    pub account_name: String,
}

/// Provisioning configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Provider CLI binary
    pub program: String,
    /// Deployment template
    pub template_path: String,
    /// Timeout for one deployment in seconds
    pub timeout_secs: u64,
    /// Timeout for one control-plane command in seconds
    pub command_timeout_secs: u64,
    /// Switch the CLI to arm mode before deploying
    pub arm_mode: bool,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            program: "azure".to_string(),
            template_path: "/etc/azure-cpi/bosh_deploy_vm.json".to_string(),
            timeout_secs: 1800,
            command_timeout_secs: 600,
            arm_mode: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
