//! # azure-cpi VM
//!
//! VM lifecycle management for the Azure cloud provider interface.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       VmManager                          │
//! │  (create, find, delete, reboot, start, shutdown, disks)  │
//! └──────┬──────────────────┬──────────────────────┬─────────┘
//!        │                  │                      │
//!        ▼                  ▼                      ▼
//! ┌─────────────┐   ┌────────────────┐   ┌───────────────────┐
//! │ deployment  │   │ DeploymentExec │   │   ProviderApi     │
//! │ endpoints   │   │ (azure group   │   │ (get/start/stop/  │
//! │ boot meta   │   │  deployment)   │   │  data disks)      │
//! └─────────────┘   └────────────────┘   └───────────────────┘
//!        identity (instance id codec) · lun (LUN allocation)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use azure_cpi_vm::{MockExecutor, MockProvider, StaticRegistry, StaticStorageAccount, VmManager};
//!
//! #[tokio::main]
//! async fn main() {
//!     let provider = Arc::new(MockProvider::new());
//!     let manager = VmManager::new(
//!         provider.clone(),
//!         Arc::new(MockExecutor::succeeding().with_provider(provider)),
//!         Arc::new(StaticRegistry::new("http://registry:25777")),
//!         Arc::new(StaticStorageAccount::new("storage1")),
//!     );
//!
//!     let instance_id = manager.create("abc", "stemcell-1", &cloud, &network, &pool).await.unwrap();
//!     let device = manager.attach_disk(&instance_id, "disk-1").await.unwrap();
//! }
//! ```

pub mod azure_cli;
pub mod boot_metadata;
pub mod deployment;
pub mod endpoints;
pub mod error;
pub mod executor;
pub mod identity;
pub mod lun;
pub mod manager;
pub mod mock;
pub mod traits;
pub mod types;

pub use azure_cli::{AzureCliConfig, AzureCliProvider};
pub use boot_metadata::BootMetadata;
pub use deployment::{build_request, DeploymentDescriptor, DeploymentRequest};
pub use endpoints::{Endpoint, Protocol};
pub use error::{CpiError, Result};
pub use executor::{CliExecutor, CommandOutput, ExecutorConfig};
pub use identity::InstanceId;
pub use manager::VmManager;
pub use mock::{MockExecutor, MockProvider};
pub use traits::{
    DeploymentExecutor, ProviderApi, Registry, StaticRegistry, StaticStorageAccount,
    StorageAccounts,
};
pub use types::*;
