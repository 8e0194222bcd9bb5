//! Boot metadata injected into the guest on first boot.
//!
//! The guest agent decodes the custom data blob and uses it to find the
//! registry holding its bootstrap settings:
//!
//! ```json
//! {
//!   "registry": { "endpoint": "http://registry:25777" },
//!   "server": { "name": "bosh-vm-abc" },
//!   "dns": { "nameserver": ["8.8.8.8"] }
//! }
//! ```
//!
//! The JSON is transported base64-encoded (standard alphabet, no line breaks).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Boot metadata for one VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootMetadata {
    pub registry: RegistrySettings,
    pub server: ServerSettings,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dns: Option<DnsSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySettings {
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsSettings {
    pub nameserver: Vec<String>,
}

impl BootMetadata {
    /// Create boot metadata for a VM. The `dns` section is omitted when no
    /// nameservers are configured.
    pub fn new(
        registry_endpoint: impl Into<String>,
        vm_name: impl Into<String>,
        nameservers: &[String],
    ) -> Self {
        Self {
            registry: RegistrySettings {
                endpoint: registry_endpoint.into(),
            },
            server: ServerSettings {
                name: vm_name.into(),
            },
            dns: (!nameservers.is_empty()).then(|| DnsSettings {
                nameserver: nameservers.to_vec(),
            }),
        }
    }

    /// Serialize and transport-encode for the deployment's custom data.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(json))
    }
}
