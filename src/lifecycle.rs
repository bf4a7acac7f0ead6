//! Probe instance lifecycle
//!
//! [`InstanceLifecycle`] owns the three cloud-side steps of a run for a single
//! instance: create it, wait for it to run, and stop it. Creation hands back an
//! [`InstanceGuard`], and the guard is the only way to reach the instance
//! afterwards, so whoever holds it is responsible for releasing it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::compute::{ComputeClient, InstanceSpec};
use crate::poll::{poll_immediate, Clock, PollConfig};
use crate::result::{FailureKind, ValidationResult};
use crate::state::{LifecycleState, Readiness};
use crate::{Error, ProbeRequest, Result};

/// Interval between status checks while waiting for an instance to run
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Boot disk size for probe instances
pub const DEFAULT_DISK_SIZE_GB: u32 = 10;

/// Project that publishes Container-Optimized OS images
const IMAGE_PROJECT: &str = "cos-cloud";

/// A probe instance created by this run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeInstance {
    /// Instance name
    pub name: String,
    /// Zone the instance lives in
    pub zone: String,
    /// Last observed lifecycle state
    pub state: LifecycleState,
}

/// Where and how probe instances are placed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    /// Project owning the instance and subnet
    pub project: String,
    /// Region of the subnet
    pub region: String,
    /// Zone for the instance
    pub zone: String,
    /// VPC network name, when it must be named explicitly
    pub network: Option<String>,
    /// Labels applied after creation
    pub labels: BTreeMap<String, String>,
    /// Boot disk size
    pub disk_size_gb: u32,
}

impl Placement {
    /// Fully qualified subnetwork path for `subnet_id`.
    ///
    /// Paths that are already qualified are passed through unchanged.
    pub fn subnetwork_path(&self, subnet_id: &str) -> String {
        if subnet_id.contains('/') {
            return subnet_id.to_string();
        }
        format!(
            "projects/{}/regions/{}/subnetworks/{}",
            self.project, self.region, subnet_id
        )
    }

    /// Fully qualified network path, if a network is configured
    pub fn network_path(&self) -> Option<String> {
        self.network
            .as_deref()
            .filter(|n| !n.is_empty())
            .map(|n| format!("projects/{}/global/networks/{}", self.project, n))
    }
}

/// Image family path for an image family name
pub fn image_family_path(image: &str) -> String {
    if image.contains('/') {
        return image.to_string();
    }
    format!("projects/{}/global/images/family/{}", IMAGE_PROJECT, image)
}

/// Exclusive handle on a created probe instance.
///
/// Release it with [`InstanceGuard::release`], which stops the instance. A
/// guard dropped without release leaks a running instance and says so in the
/// log.
#[must_use = "a probe instance must be released or it keeps running"]
#[derive(Debug)]
pub struct InstanceGuard {
    instance: Option<ProbeInstance>,
}

impl InstanceGuard {
    fn new(instance: ProbeInstance) -> Self {
        Self {
            instance: Some(instance),
        }
    }

    /// The guarded instance
    pub fn instance(&self) -> &ProbeInstance {
        self.instance
            .as_ref()
            .unwrap_or_else(|| unreachable!("instance is only taken on release"))
    }

    /// Mutable access to the guarded instance
    pub fn instance_mut(&mut self) -> &mut ProbeInstance {
        self.instance
            .as_mut()
            .unwrap_or_else(|| unreachable!("instance is only taken on release"))
    }

    /// Stop the instance, recording a teardown failure if that fails
    pub async fn release(mut self, lifecycle: &InstanceLifecycle, result: &mut ValidationResult) {
        if let Some(instance) = self.instance.take() {
            lifecycle.terminate(&instance, result).await;
        }
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if let Some(instance) = &self.instance {
            error!(
                instance = %instance.name,
                zone = %instance.zone,
                "Probe instance dropped without teardown, it must be stopped manually"
            );
        }
    }
}

/// Creation failed
#[derive(Debug)]
pub struct CreateError {
    /// What went wrong
    pub error: Error,
    /// The instance, if it was created before the failure
    pub orphan: Option<InstanceGuard>,
}

/// Create, await and terminate probe instances
pub struct InstanceLifecycle {
    client: Arc<dyn ComputeClient>,
    clock: Arc<dyn Clock>,
    placement: Placement,
}

impl InstanceLifecycle {
    /// Lifecycle over the given client, clock and placement
    pub fn new(
        client: Arc<dyn ComputeClient>,
        clock: Arc<dyn Clock>,
        placement: Placement,
    ) -> Self {
        Self {
            client,
            clock,
            placement,
        }
    }

    /// Create the probe instance and label it.
    ///
    /// Both calls are made once. If the insert fails no instance exists; if
    /// labeling fails the instance does, and is returned in
    /// [`CreateError::orphan`] for teardown.
    pub async fn create(
        &self,
        name: String,
        request: &ProbeRequest,
        user_data: String,
    ) -> std::result::Result<InstanceGuard, CreateError> {
        let spec = InstanceSpec {
            name: name.clone(),
            machine_type: request.machine_type.clone(),
            source_image: image_family_path(request.effective_image()),
            subnetwork: self.placement.subnetwork_path(&request.subnet_id),
            network: self.placement.network_path(),
            user_data,
            disk_size_gb: self.placement.disk_size_gb,
        };

        debug!(
            instance = %name,
            machine_type = %spec.machine_type,
            image = %spec.source_image,
            subnetwork = %spec.subnetwork,
            "Creating probe instance"
        );

        if let Err(e) = self.client.insert_instance(&spec).await {
            return Err(CreateError {
                error: Error::creation(e.to_string()),
                orphan: None,
            });
        }

        info!(instance = %name, "Created probe instance");

        let guard = InstanceGuard::new(ProbeInstance {
            name: name.clone(),
            zone: self.placement.zone.clone(),
            state: LifecycleState::Provisioning,
        });

        info!(instance = %name, "Applying labels");
        if let Err(e) = self.client.set_labels(&name, &self.placement.labels).await {
            return Err(CreateError {
                error: Error::creation(format!("unable to apply labels: {}", e)),
                orphan: Some(guard),
            });
        }
        info!(instance = %name, "Successfully applied labels");

        Ok(guard)
    }

    /// Wait for the instance to report `RUNNING`.
    ///
    /// Pending and unknown states keep the wait going; stopped-family states
    /// and permission errors end it immediately.
    pub async fn await_running(
        &self,
        instance: &mut ProbeInstance,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let last_state = Mutex::new(instance.state);
        let client = &self.client;
        let name = instance.name.as_str();
        let observed = &last_state;

        let outcome = poll_immediate(
            self.clock.as_ref(),
            cancel,
            &PollConfig::new(READINESS_POLL_INTERVAL, timeout),
            "instance running",
            move || async move {
                let (state, detail) = match client.get_instance_status(name).await {
                    Ok(status) => (LifecycleState::from_provider_status(&status), status),
                    Err(e) if e.is_permission_denied() => {
                        error!(
                            instance = %name,
                            error = %e,
                            "Errors while describing the instance status"
                        );
                        (LifecycleState::PermissionDenied, e.to_string())
                    }
                    Err(e) => return Err(Error::from(e)),
                };
                *observed.lock().unwrap_or_else(|e| e.into_inner()) = state;

                match state.readiness() {
                    Readiness::Ready => {
                        info!(instance = %name, %state, "Probe instance is running");
                        Ok(true)
                    }
                    Readiness::Fatal => {
                        debug!(instance = %name, %state, "Fatal instance status");
                        Err(Error::FatalState {
                            instance: name.to_string(),
                            state,
                        })
                    }
                    Readiness::Unauthorized => Err(Error::PermissionDenied(detail)),
                    Readiness::Pending => {
                        if detail.is_empty() {
                            debug!(instance = %name, "Instance has no status yet");
                        } else {
                            debug!(instance = %name, status = %detail, "Waiting on VM operation");
                        }
                        Ok(false)
                    }
                }
            },
        )
        .await;

        instance.state = last_state.into_inner().unwrap_or_else(|e| e.into_inner());
        outcome.map_err(|e| Error::from_poll("instance to be running", e))
    }

    /// Stop the instance.
    ///
    /// Best effort: a failed stop is recorded on `result` as a teardown
    /// failure and otherwise ignored.
    pub async fn terminate(&self, instance: &ProbeInstance, result: &mut ValidationResult) {
        info!(instance = %instance.name, "Terminating probe instance");
        match self.client.stop_instance(&instance.name).await {
            Ok(()) => debug!(instance = %instance.name, "Stop request accepted"),
            Err(e) => {
                warn!(instance = %instance.name, error = %e, "Failed to stop probe instance");
                result.record(
                    FailureKind::Teardown,
                    format!("unable to stop instance {}: {}", instance.name, e),
                );
            }
        }
    }
}
