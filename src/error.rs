//! Error types for egress validation

use thiserror::Error;

use crate::compute::ComputeError;
use crate::poll::PollError;
use crate::state::LifecycleState;
use crate::userdata::TemplateError;

/// Main error type for egress validation
///
/// Every control error a run can hit ends up here before it is recorded on the
/// [`ValidationResult`](crate::ValidationResult). Callers of
/// [`EgressController::validate_egress`](crate::EgressController::validate_egress)
/// never see these directly; they see the recorded failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The probe instance could not be created or labeled
    #[error("unable to create instance: {0}")]
    Creation(String),

    /// The instance reached a stopped/terminated state before running
    #[error("instance {instance} already exists with {state} state, please run again")]
    FatalState {
        /// Instance name
        instance: String,
        /// State the provider reported
        state: LifecycleState,
    },

    /// The account may not inspect or manage the instance
    #[error("missing required permissions for account: {0}")]
    PermissionDenied(String),

    /// A polling phase ran past its deadline
    #[error("timed out after {timeout:?} waiting for {phase}")]
    Timeout {
        /// Human-readable name of the phase
        phase: &'static str,
        /// Deadline that elapsed
        timeout: std::time::Duration,
    },

    /// The caller cancelled the run
    #[error("cancelled while waiting for {0}")]
    Cancelled(&'static str),

    /// A compute API call failed
    #[error("compute API error: {0}")]
    Compute(#[from] ComputeError),

    /// The boot script could not be rendered
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Input or preflight validation failed
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a creation error with the given message
    pub fn creation(msg: impl Into<String>) -> Self {
        Self::Creation(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error is a timeout of some polling phase
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether the run was cancelled by the caller
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Flatten the outcome of a polling phase into a single error
    pub(crate) fn from_poll(phase: &'static str, err: PollError<Error>) -> Self {
        match err {
            PollError::Condition(e) => e,
            PollError::Timeout(timeout) => Self::Timeout { phase, timeout },
            PollError::Cancelled => Self::Cancelled(phase),
        }
    }
}
