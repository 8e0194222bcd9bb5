//! # azure-cpi
//!
//! Command-line entry point of the Azure cloud provider interface. Each
//! invocation performs one VM lifecycle or disk operation and prints the
//! result as JSON on stdout; logs go to stderr.
//!
//! ## Usage
//! ```bash
//! azure-cpi --config /etc/azure-cpi/cpi.yaml create \
//!     --stemcell stemcell-1 --network network.yml --resource-pool pool.yml
//! azure-cpi attach-disk 'dg1&bosh-vm-abc' disk-1
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use azure_cpi_common::{init_logging, LogFormat};
use azure_cpi_vm::identity::instance_id_from_agent_dir;
use azure_cpi_vm::{
    AzureCliProvider, CliExecutor, DeploymentExecutor, MockExecutor, MockProvider, NetworkConfig,
    ProviderApi, ResourcePool, StaticRegistry, StaticStorageAccount, VmManager,
};

mod cli;
mod config;

use cli::{Args, Command};
use config::{load_file, Config, DEFAULT_CONFIG_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let (config, source) = Config::resolve(args.config.as_deref(), DEFAULT_CONFIG_PATH)?;
    let config = config.with_cli_overrides(&args);

    // Initialize logging
    let format: LogFormat = config.logging.format.parse()?;
    init_logging(&config.logging.level, format)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %source,
        dev = config.dev,
        "Starting azure-cpi"
    );

    let output = match run(&config, args.command).await {
        Ok(output) => output,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Operation failed");
            return Err(e);
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(config: &Config, command: Command) -> Result<serde_json::Value> {
    let manager = build_manager(config)?;

    let output = match command {
        Command::Create { uuid, stemcell, network, resource_pool } => {
            config.validate()?;
            let network: NetworkConfig = load_file(&network)?;
            let resource_pool: ResourcePool = load_file(&resource_pool)?;
            let instance_uuid = uuid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            let instance_id = manager
                .create(&instance_uuid, &stemcell, &config.azure, &network, &resource_pool)
                .await?;
            json!({ "instance_id": instance_id })
        }
        Command::Find { instance_id } => serde_json::to_value(manager.find(&instance_id).await?)?,
        Command::Delete { instance_id } => {
            manager.delete(&instance_id).await?;
            json!({ "deleted": instance_id })
        }
        Command::Reboot { instance_id } => {
            manager.reboot(&instance_id).await?;
            json!({ "rebooted": instance_id })
        }
        Command::Start { instance_id } => {
            manager.start(&instance_id).await?;
            json!({ "started": instance_id })
        }
        Command::Shutdown { instance_id } => {
            manager.shutdown(&instance_id).await?;
            json!({ "stopped": instance_id })
        }
        Command::AttachDisk { instance_id, disk_name } => {
            let device = manager.attach_disk(&instance_id, &disk_name).await?;
            json!({ "device": device })
        }
        Command::DetachDisk { instance_id, disk_name } => {
            manager.detach_disk(&instance_id, &disk_name).await?;
            json!({ "detached": disk_name })
        }
        Command::GetDisks { instance_id } => json!(manager.get_disks(&instance_id).await?),
        Command::VolumeName { instance_id, disk_name } => {
            json!({ "device": manager.volume_name(&instance_id, &disk_name).await? })
        }
        Command::InstanceId { agent_dir } => {
            json!({ "instance_id": instance_id_from_agent_dir(&agent_dir)? })
        }
    };

    Ok(output)
}

/// Wire the manager to the real CLI, or to the mock doubles in dev mode.
fn build_manager(config: &Config) -> Result<VmManager> {
    type Backends = (Arc<dyn ProviderApi>, Arc<dyn DeploymentExecutor>);

    let (provider, executor): Backends = if config.dev {
        let state = config.dev_state_path();
        let provider = Arc::new(
            MockProvider::with_state_file(&state)
                .with_context(|| format!("Failed to load dev state from {}", state.display()))?,
        );
        let executor = Arc::new(MockExecutor::succeeding().with_provider(provider.clone()));
        (provider, executor)
    } else {
        (
            Arc::new(AzureCliProvider::new(config.provider_config())),
            Arc::new(CliExecutor::new(config.executor_config())),
        )
    };

    Ok(VmManager::new(
        provider,
        executor,
        Arc::new(StaticRegistry::new(config.registry.endpoint.clone())),
        Arc::new(StaticStorageAccount::new(config.storage.account_name.clone())),
    ))
}
