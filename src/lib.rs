//! Egress Verifier - probe-instance validation of outbound connectivity
//!
//! Egress Verifier answers one question for an operator: does this subnet let a
//! managed cluster reach the endpoints it needs? It answers by booting a
//! disposable instance into the subnet, letting a boot script probe every
//! required endpoint, and reading the verdict back off the serial console.
//!
//! # Architecture
//!
//! A validation run is a short, strictly sequential lifecycle:
//! - The probe instance is created with the rendered boot script as user-data
//! - The instance is polled until it reports `RUNNING`
//! - The serial console is polled until the boot script's completion marker
//!   appears, then scanned once for failures and unreachable endpoints
//! - The instance is stopped, on every exit path
//!
//! # Modules
//!
//! - [`poll`] - Bounded polling primitive with cancellation and an injectable clock
//! - [`state`] - Provider status to [`state::LifecycleState`] mapping
//! - [`compute`] - The [`compute::ComputeClient`] seam over the cloud control plane
//! - [`gcp`] - Compute Engine REST implementation of the client
//! - [`lifecycle`] - Create / await-running / terminate for one probe instance
//! - [`console`] - Serial console analysis
//! - [`controller`] - The end-to-end validation run
//! - [`userdata`] - Boot script templating
//! - [`preflight`] - Machine type validation ahead of a run
//! - [`request`] - The [`request::ProbeRequest`] describing one run
//! - [`config`] - Verifier configuration
//! - [`naming`] - Collision-resistant probe instance names
//! - [`result`] - The [`result::ValidationResult`] returned to callers
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod compute;
pub mod config;
pub mod console;
pub mod controller;
pub mod error;
pub mod gcp;
pub mod lifecycle;
pub mod naming;
pub mod poll;
pub mod preflight;
pub mod request;
pub mod result;
pub mod state;
pub mod userdata;

pub use controller::EgressController;
pub use error::Error;
pub use request::{ProbeRequest, ProxyConfig};
pub use result::ValidationResult;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Literal the boot script prints once it has finished probing.
///
/// Shared by the templating step and the console analyzer; the two must agree
/// byte for byte or the analyzer waits until its deadline.
pub const USERDATA_END_MARKER: &str = "USERDATA END";

/// Literal the boot script prints before doing anything else
pub const USERDATA_BEGIN_MARKER: &str = "USERDATA BEGIN";

/// Image family used when the caller does not name one (Container-Optimized OS)
pub const DEFAULT_IMAGE_FAMILY: &str = "cos-97-lts";

/// Container image that performs the endpoint probes inside the instance
pub const DEFAULT_VALIDATOR_IMAGE: &str = "quay.io/app-sre/osd-network-verifier:v0.1.159-9a6e0eb";

/// Default machine type for the probe instance
pub const DEFAULT_MACHINE_TYPE: &str = "e2-standard-2";
