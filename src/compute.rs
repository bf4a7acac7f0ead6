//! Compute control-plane abstraction
//!
//! The controller talks to the cloud through [`ComputeClient`] only. Every
//! method is a single attempt: retries, if any, are the caller's decision,
//! and the lifecycle code deliberately makes none.

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

/// Errors returned by compute API calls
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ComputeError {
    /// The credentials lack a required permission
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The named resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The API rejected the call
    #[error("API returned {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the response body
        message: String,
    },

    /// The request never got an HTTP response
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ComputeError {
    /// Whether the error is an authorization failure
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

/// Everything the control plane needs to create a probe instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceSpec {
    /// Instance name, unique within the zone
    pub name: String,
    /// Machine type name (e.g. `e2-standard-2`)
    pub machine_type: String,
    /// Fully qualified boot image (family) path
    pub source_image: String,
    /// Fully qualified subnetwork path
    pub subnetwork: String,
    /// Fully qualified network path, when the subnet's VPC is named explicitly
    pub network: Option<String>,
    /// Boot script passed as `user-data` metadata
    pub user_data: String,
    /// Boot disk size
    pub disk_size_gb: u32,
}

/// Operations on compute instances in one project and zone
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ComputeClient: Send + Sync {
    /// Create an instance
    async fn insert_instance(&self, spec: &InstanceSpec) -> Result<(), ComputeError>;

    /// Get the provider-reported status string of an instance
    async fn get_instance_status(&self, name: &str) -> Result<String, ComputeError>;

    /// Replace the labels of an instance
    async fn set_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), ComputeError>;

    /// Get the full serial console output accumulated so far
    async fn get_serial_port_output(&self, name: &str) -> Result<String, ComputeError>;

    /// Stop an instance
    async fn stop_instance(&self, name: &str) -> Result<(), ComputeError>;

    /// List the machine type names available in the zone
    async fn list_machine_types(&self) -> Result<Vec<String>, ComputeError>;
}
