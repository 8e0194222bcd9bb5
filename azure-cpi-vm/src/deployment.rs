//! Deployment descriptor construction.
//!
//! A create call merges the cloud options, the network configuration, the
//! resource pool and the collaborators' outputs into one
//! [`DeploymentDescriptor`]. The descriptor is handed to the deployment
//! template as a parameter envelope where every field is wrapped as
//! `{"value": ...}`.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::boot_metadata::BootMetadata;
use crate::endpoints::{endpoints_for, Endpoint};
use crate::error::{CpiError, Result};
use crate::types::{CloudOptions, NetworkConfig, ResourcePool};

/// Machine name prefix for every VM created by the CPI.
pub const VM_NAME_PREFIX: &str = "bosh-vm-";

/// Machine name for an instance UUID.
pub fn vm_name_for(uuid: &str) -> String {
    format!("{}{}", VM_NAME_PREFIX, uuid)
}

/// Everything the deployment template needs to create one VM.
///
/// Field names are the template's parameter names.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentDescriptor {
    pub vm_name: String,
    pub vm_user: String,
    pub image: String,
    pub location: String,
    pub domain_name: String,
    pub virtual_network_name: String,
    pub ip: String,
    pub subnet_name: String,
    pub vm_size: String,
    pub password: String,
    pub storage_account_name: String,
    /// JSON-encoded [`DeployScript`]; the parameter name is the template's spelling
    #[serde(rename = "deploy_script_paramter")]
    pub deploy_script_parameter: String,
    pub endpoints: Vec<Endpoint>,
}

/// Arguments for the template's guest bootstrap script.
#[derive(Debug, Clone, Serialize)]
pub struct DeployScript {
    /// Base64 boot metadata
    pub custom_data: String,
    pub ssh_key: Option<String>,
    pub vm_user: String,
}

impl DeploymentDescriptor {
    /// Check that every field the template requires is present.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("vm_name", &self.vm_name),
            ("vm_user", &self.vm_user),
            ("image", &self.image),
            ("location", &self.location),
            ("domain_name", &self.domain_name),
            ("virtual_network_name", &self.virtual_network_name),
            ("ip", &self.ip),
            ("subnet_name", &self.subnet_name),
            ("vm_size", &self.vm_size),
            ("password", &self.password),
            ("storage_account_name", &self.storage_account_name),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(CpiError::InvalidConfig(format!(
                "VM {} is missing required deployment fields: {}",
                self.vm_name,
                missing.join(", ")
            )));
        }

        Ok(())
    }

    /// Wrap every field as `{"value": ...}` for submission.
    pub fn parameters(&self) -> Result<Value> {
        let Value::Object(fields) = serde_json::to_value(self)? else {
            return Err(CpiError::Internal(
                "deployment descriptor did not serialize to an object".to_string(),
            ));
        };

        let wrapped: Map<String, Value> = fields
            .into_iter()
            .map(|(name, value)| (name, json!({ "value": value })))
            .collect();

        Ok(Value::Object(wrapped))
    }
}

/// A validated descriptor bound to the resource group it deploys into.
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub resource_group: String,
    pub descriptor: DeploymentDescriptor,
}

impl DeploymentRequest {
    pub fn vm_name(&self) -> &str {
        &self.descriptor.vm_name
    }
}

/// Build the deployment request for a new VM.
///
/// `storage_account_name` comes from the storage collaborator and
/// `registry_endpoint` from the registry collaborator.
pub fn build_request(
    uuid: &str,
    image: &str,
    cloud: &CloudOptions,
    network: &NetworkConfig,
    resource_pool: &ResourcePool,
    storage_account_name: String,
    registry_endpoint: &str,
) -> Result<DeploymentRequest> {
    if cloud.resource_group_name.trim().is_empty() {
        return Err(CpiError::InvalidConfig(
            "resource_group_name is required".to_string(),
        ));
    }

    let endpoints = endpoints_for(network)?;
    let vm_name = vm_name_for(uuid);

    let custom_data =
        BootMetadata::new(registry_endpoint, vm_name.as_str(), &network.dns).encode()?;
    let deploy_script = DeployScript {
        custom_data,
        ssh_key: cloud.vm_authorized_keys.clone(),
        vm_user: cloud.ssh_user.clone(),
    };

    let descriptor = DeploymentDescriptor {
        vm_name,
        vm_user: cloud.ssh_user.clone(),
        image: image.to_string(),
        location: cloud.location.clone(),
        domain_name: network.domain_name.clone(),
        virtual_network_name: network.virtual_network_name.clone(),
        ip: network.ip.clone(),
        subnet_name: network.subnet_name.clone(),
        vm_size: resource_pool.instance_type.clone(),
        password: cloud.password.clone(),
        storage_account_name,
        deploy_script_parameter: serde_json::to_string(&deploy_script)?,
        endpoints,
    };
    descriptor.validate()?;

    Ok(DeploymentRequest {
        resource_group: cloud.resource_group_name.clone(),
        descriptor,
    })
}
