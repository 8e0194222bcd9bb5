//! Error types for the VM lifecycle layer.

use thiserror::Error;

/// Errors that can occur during VM lifecycle operations.
#[derive(Error, Debug)]
pub enum CpiError {
    /// The provisioning subprocess exited with a non-zero status.
    #[error("Failed to create VM {vm_name}: provisioning exited with code {exit_code}\n{log}")]
    ProvisioningFailed {
        vm_name: String,
        exit_code: i32,
        /// Combined stdout/stderr of the provisioning run
        log: String,
    },

    /// The provisioning subprocess did not finish in time and was killed.
    #[error("Failed to create VM {vm_name}: provisioning timed out after {timeout_secs}s")]
    ProvisioningTimedOut { vm_name: String, timeout_secs: u64 },

    /// The decoded instance id has no provider record.
    #[error("{operation}: instance {instance_id} does not exist")]
    InstanceNotFound {
        operation: &'static str,
        instance_id: String,
    },

    /// The named disk is not attached to the instance.
    #[error("{operation}: disk {disk_name} is not attached to instance {instance_id}")]
    DiskNotAttached {
        operation: &'static str,
        instance_id: String,
        disk_name: String,
    },

    /// The string was not produced by the identity codec.
    #[error("{operation}: malformed instance id '{instance_id}': {reason}")]
    MalformedIdentity {
        operation: &'static str,
        instance_id: String,
        reason: String,
    },

    /// A required field is missing from the guest configuration file.
    #[error("Failed to parse guest configuration: {0}")]
    GuestConfigParse(String),

    /// A port-forwarding entry could not be parsed.
    #[error("{operation}: invalid endpoint for instance {instance_id}: {reason}")]
    InvalidEndpoint {
        operation: &'static str,
        instance_id: String,
        reason: String,
    },

    /// The LUN has no single-letter device name, or the provider reported garbage.
    #[error("{operation}: invalid LUN for instance {instance_id}: {reason}")]
    InvalidLun {
        operation: &'static str,
        instance_id: String,
        reason: String,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error reported by the provider control plane, passed through unchanged.
    #[error("Provider error: {0}")]
    Provider(String),

    /// I/O error (spawning the provisioning program, reading guest files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CpiError {
    pub(crate) fn malformed_identity(instance_id: &str, reason: impl Into<String>) -> Self {
        Self::MalformedIdentity {
            operation: "decode",
            instance_id: instance_id.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_endpoint(reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            operation: "parse_endpoints",
            instance_id: String::new(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_lun(reason: impl Into<String>) -> Self {
        Self::InvalidLun {
            operation: "lun",
            instance_id: String::new(),
            reason: reason.into(),
        }
    }

    /// Attribute a validation error to the facade operation and instance it
    /// occurred in. Other variants already carry their context.
    pub fn during(self, operation: &'static str, instance_id: &str) -> Self {
        let instance_id = instance_id.to_string();
        match self {
            Self::MalformedIdentity { reason, .. } => Self::MalformedIdentity {
                operation,
                instance_id,
                reason,
            },
            Self::InvalidEndpoint { reason, .. } => Self::InvalidEndpoint {
                operation,
                instance_id,
                reason,
            },
            Self::InvalidLun { reason, .. } => Self::InvalidLun {
                operation,
                instance_id,
                reason,
            },
            other => other,
        }
    }
}

/// Result type alias for VM lifecycle operations.
pub type Result<T> = std::result::Result<T, CpiError>;
