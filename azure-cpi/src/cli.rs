//! Command-line argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// azure-cpi - VM lifecycle and disk management for Azure
#[derive(Parser, Debug)]
#[command(name = "azure-cpi")]
#[command(about = "azure-cpi - VM lifecycle and disk management for Azure")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long, env = "AZURE_CPI_CONFIG")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Provider CLI binary
    #[arg(long)]
    pub azure_cli: Option<String>,

    /// Deployment template used by `create`
    #[arg(long)]
    pub template: Option<String>,

    /// Provisioning timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Enable development mode (mock provider, nothing is deployed)
    #[arg(long)]
    pub dev: bool,

    /// JSON file the development-mode provider keeps its VMs in
    #[arg(long)]
    pub dev_state: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CPI operations. Results are printed to stdout as JSON.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a VM and print its instance id
    Create {
        /// Instance UUID (generated if not provided)
        #[arg(long)]
        uuid: Option<String>,
        /// Stemcell image reference
        #[arg(long)]
        stemcell: String,
        /// Network configuration file (YAML or JSON)
        #[arg(long)]
        network: PathBuf,
        /// Resource pool file (YAML or JSON)
        #[arg(long)]
        resource_pool: PathBuf,
    },

    /// Print the provider record of a VM, or null
    Find { instance_id: String },

    /// Delete a VM
    Delete { instance_id: String },

    /// Reboot a VM
    Reboot { instance_id: String },

    /// Start a stopped VM
    Start { instance_id: String },

    /// Shut a VM down
    Shutdown { instance_id: String },

    /// Attach a data disk and print its device path
    AttachDisk { instance_id: String, disk_name: String },

    /// Detach a data disk
    DetachDisk { instance_id: String, disk_name: String },

    /// List attached data disks
    GetDisks { instance_id: String },

    /// Print the device path of an attached data disk
    VolumeName { instance_id: String, disk_name: String },

    /// Print the instance id of the VM this command runs on
    InstanceId {
        /// Guest agent library directory holding SharedConfig.xml
        #[arg(long, default_value = "/var/lib/waagent")]
        agent_dir: PathBuf,
    },
}
