//! Type definitions for VM inputs and provider records.

use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// CREATE INPUTS
// =============================================================================

/// Cloud-wide options shared by every VM the CPI creates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudOptions {
    /// Admin user created in the guest
    pub ssh_user: String,
    /// Provider region (e.g., "eastus")
    pub location: String,
    /// Admin password
    pub password: String,
    /// Authorized-keys payload injected for `ssh_user`
    pub vm_authorized_keys: Option<String>,
    /// Resource group the deployment is created in
    pub resource_group_name: String,
}

/// Network configuration for a single VM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Deployment group (cloud service) the VM registers under
    pub domain_name: String,
    /// Virtual network name
    pub virtual_network_name: String,
    /// Subnet inside the virtual network
    pub subnet_name: String,
    /// Static private IP
    pub ip: String,
    /// DNS nameservers handed to the guest agent
    #[serde(deserialize_with = "one_or_many")]
    pub dns: Vec<String>,
    /// Comma-separated `public:private` TCP port pairs
    pub tcp_endpoints: String,
    /// Comma-separated `public:private` UDP port pairs
    pub udp_endpoints: String,
}

/// Resource-pool sizing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcePool {
    /// VM size / SKU (e.g., "Standard_A1")
    pub instance_type: String,
}

/// Accepts either `dns: 8.8.8.8` or `dns: [8.8.8.8, 8.8.4.4]`.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) if s.trim().is_empty() => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

// =============================================================================
// PROVIDER RECORDS
// =============================================================================

/// Power state reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Running,
    Stopped,
    #[default]
    Unknown,
}

/// VM as read back from the provider's control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmRecord {
    /// Machine (role) name
    pub name: String,
    /// Deployment group (cloud service) name
    pub deployment_group: String,
    /// Deployment the role belongs to
    pub deployment_name: String,
    /// Current power state
    pub state: PowerState,
    /// VM size
    pub size: String,
    /// Attached data disks, in provider order
    pub data_disks: Vec<DataDisk>,
}

/// Host caching policy for a data disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HostCaching {
    #[default]
    None,
    ReadOnly,
    ReadWrite,
}

impl HostCaching {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostCaching::None => "None",
            HostCaching::ReadOnly => "ReadOnly",
            HostCaching::ReadWrite => "ReadWrite",
        }
    }
}

/// Data disk attached to a VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDisk {
    pub name: String,
    /// LUN as the provider reports it; may be empty for the first slot
    #[serde(default)]
    pub lun: String,
    #[serde(default)]
    pub host_caching: HostCaching,
    #[serde(default)]
    pub label: String,
}

impl DataDisk {
    /// Create a disk record at the given LUN.
    pub fn new(name: impl Into<String>, lun: u32) -> Self {
        Self {
            name: name.into(),
            lun: lun.to_string(),
            host_caching: HostCaching::None,
            label: String::new(),
        }
    }
}

/// Options for an add-data-disk call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataDiskOptions {
    /// Attach an existing disk rather than creating an empty one
    pub import: bool,
    pub disk_name: String,
    pub host_caching: HostCaching,
    pub label: String,
    pub lun: u32,
}
