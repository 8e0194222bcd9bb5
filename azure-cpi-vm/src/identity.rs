//! Instance identity codec.
//!
//! An instance id is the pair `(deployment group, machine name)` folded into
//! one string: each half is percent-encoded and the halves are joined with
//! `&`. Percent-encoding escapes `&`, so the separator is unambiguous and the
//! pair round-trips exactly.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{CpiError, Result};

/// Name of the guest agent's shared configuration file.
pub const SHARED_CONFIG_FILE: &str = "SharedConfig.xml";

const SEPARATOR: char = '&';

static SERVICE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<Service name="([^"]+)" guid="\{[-0-9a-fA-F]+\}"\s*/>"#)
        .expect("service name pattern is valid")
});

static INCARNATION_INSTANCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<Incarnation number="\d*" instance="([^"]+)" guid="\{[-0-9a-fA-F]+\}"\s*/>"#)
        .expect("incarnation pattern is valid")
});

/// Decoded instance identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId {
    /// Deployment group (cloud service) name
    pub deployment_group: String,
    /// Machine (role) name
    pub vm_name: String,
}

impl InstanceId {
    pub fn new(deployment_group: impl Into<String>, vm_name: impl Into<String>) -> Self {
        Self {
            deployment_group: deployment_group.into(),
            vm_name: vm_name.into(),
        }
    }

    /// Encode into the opaque, persistable form.
    pub fn encode(&self) -> String {
        encode(&self.deployment_group, &self.vm_name)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl std::str::FromStr for InstanceId {
    type Err = CpiError;

    fn from_str(s: &str) -> Result<Self> {
        decode(s)
    }
}

/// Encode a `(deployment group, machine name)` pair into an instance id.
pub fn encode(deployment_group: &str, vm_name: &str) -> String {
    format!(
        "{}{}{}",
        urlencoding::encode(deployment_group),
        SEPARATOR,
        urlencoding::encode(vm_name)
    )
}

/// Decode an instance id produced by [`encode`].
pub fn decode(instance_id: &str) -> Result<InstanceId> {
    let malformed = |reason: &str| CpiError::malformed_identity(instance_id, reason);

    let (group, name) = instance_id
        .split_once(SEPARATOR)
        .ok_or_else(|| malformed("missing separator"))?;
    if group.is_empty() || name.is_empty() {
        return Err(malformed("empty deployment group or vm name"));
    }

    let group =
        urlencoding::decode(group).map_err(|_| malformed("bad escape in deployment group"))?;
    let name = urlencoding::decode(name).map_err(|_| malformed("bad escape in vm name"))?;

    // Only canonical encodings are accepted, so every id has exactly one form.
    let id = InstanceId::new(group, name);
    if id.encode() != instance_id {
        return Err(malformed("not in canonical form"));
    }

    Ok(id)
}

/// Extract the instance id from the contents of the guest's `SharedConfig.xml`.
pub fn extract_from_guest_config(contents: &str) -> Result<String> {
    let service_name = SERVICE_NAME
        .captures(contents)
        .and_then(|c| c.get(1))
        .ok_or_else(|| CpiError::GuestConfigParse("Service name not found".to_string()))?;

    let vm_name = INCARNATION_INSTANCE
        .captures(contents)
        .and_then(|c| c.get(1))
        .ok_or_else(|| CpiError::GuestConfigParse("Incarnation instance not found".to_string()))?;

    Ok(encode(service_name.as_str(), vm_name.as_str()))
}

/// Read `SharedConfig.xml` from the guest agent's library directory and
/// return the instance id of the VM this process runs on.
pub fn instance_id_from_agent_dir(agent_dir: &Path) -> Result<String> {
    let path = agent_dir.join(SHARED_CONFIG_FILE);
    let contents = std::fs::read_to_string(&path).map_err(|e| {
        CpiError::GuestConfigParse(format!("Failed to read {}: {}", path.display(), e))
    })?;
    extract_from_guest_config(&contents)
}
