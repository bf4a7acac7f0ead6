//! Instance lifecycle states
//!
//! The provider reports instance status as free-form strings
//! (`PROVISIONING`, `RUNNING`, ...). They are converted into
//! [`LifecycleState`] at the client boundary; nothing past that boundary
//! looks at the raw string again.
//!
//! See <https://cloud.google.com/compute/docs/instances/instance-life-cycle>.

use serde::Serialize;

/// Lifecycle state of a probe instance as observed through the control plane
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Resources are being allocated
    Provisioning,
    /// Resources are acquired, the instance is preparing for first boot
    Staging,
    /// The instance is booting or running
    Running,
    /// The instance is being stopped
    Stopping,
    /// The instance is stopped
    Stopped,
    /// The instance has been terminated
    Terminated,
    /// The instance is suspended
    Suspended,
    /// Empty or unrecognized status
    Unknown,
    /// The account is not allowed to read the instance
    PermissionDenied,
}

/// How a state affects a readiness wait
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// Keep polling
    Pending,
    /// The instance is running
    Ready,
    /// The instance is in a state it will not leave on its own
    Fatal,
    /// The account lacks permissions; retrying cannot help
    Unauthorized,
}

impl LifecycleState {
    /// Map a provider-reported status string.
    ///
    /// Unrecognized and empty values are [`LifecycleState::Unknown`], never an
    /// error: a status introduced by the provider later must not abort a run.
    pub fn from_provider_status(status: &str) -> Self {
        match status {
            "PROVISIONING" => Self::Provisioning,
            "STAGING" => Self::Staging,
            "RUNNING" => Self::Running,
            "STOPPING" => Self::Stopping,
            "STOPPED" => Self::Stopped,
            "TERMINATED" => Self::Terminated,
            "SUSPENDED" => Self::Suspended,
            _ => Self::Unknown,
        }
    }

    /// Classify this state for a readiness wait
    pub fn readiness(&self) -> Readiness {
        match self {
            Self::Running => Readiness::Ready,
            Self::Stopping | Self::Stopped | Self::Terminated | Self::Suspended => {
                Readiness::Fatal
            }
            Self::PermissionDenied => Readiness::Unauthorized,
            Self::Provisioning | Self::Staging | Self::Unknown => Readiness::Pending,
        }
    }

    /// Convert to the provider's spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "PROVISIONING",
            Self::Staging => "STAGING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Terminated => "TERMINATED",
            Self::Suspended => "SUSPENDED",
            Self::Unknown => "UNKNOWN",
            Self::PermissionDenied => "PERMISSION_DENIED",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
