//! Egress validation controller
//!
//! [`EgressController::validate_egress`] runs one probe end to end:
//!
//! ```text
//! render boot script -> create -> await RUNNING -> read console -> terminate
//! ```
//!
//! Control errors stop the remaining steps, findings accumulate, and every
//! path that created an instance goes through teardown exactly once. The
//! caller always gets a [`ValidationResult`]; nothing is raised.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::compute::ComputeClient;
use crate::config::VerifierConfig;
use crate::console::ConsoleLogAnalyzer;
use crate::lifecycle::{CreateError, InstanceLifecycle};
use crate::naming::InstanceNameGenerator;
use crate::poll::{Clock, TokioClock};
use crate::result::{FailureKind, ValidationResult};
use crate::userdata::UserdataTemplate;
use crate::{Error, ProbeRequest};

/// Runs egress validations against one project and zone
pub struct EgressController {
    lifecycle: InstanceLifecycle,
    analyzer: ConsoleLogAnalyzer,
    template: UserdataTemplate,
    names: InstanceNameGenerator,
    validator_image: String,
    readiness_timeout: Duration,
}

impl EgressController {
    /// Controller using the tokio clock and entropy-seeded instance names
    pub fn new(client: Arc<dyn ComputeClient>, config: &VerifierConfig) -> Self {
        Self::with_parts(
            client,
            Arc::new(TokioClock),
            InstanceNameGenerator::new(),
            config,
        )
    }

    /// Controller with an explicit clock and name generator
    pub fn with_parts(
        client: Arc<dyn ComputeClient>,
        clock: Arc<dyn Clock>,
        names: InstanceNameGenerator,
        config: &VerifierConfig,
    ) -> Self {
        Self {
            lifecycle: InstanceLifecycle::new(client.clone(), clock.clone(), config.placement()),
            analyzer: ConsoleLogAnalyzer::new(client, clock, config.console_poll()),
            template: UserdataTemplate::new(),
            names,
            validator_image: config.validator_image.clone(),
            readiness_timeout: config.readiness_timeout,
        }
    }

    /// Run one validation
    pub async fn validate_egress(&self, request: &ProbeRequest) -> ValidationResult {
        self.validate_egress_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Run one validation, stopping early when `cancel` fires.
    ///
    /// A cancelled run still stops its instance before returning.
    #[instrument(skip_all, fields(subnet = %request.subnet_id))]
    pub async fn validate_egress_with_cancel(
        &self,
        request: &ProbeRequest,
        cancel: &CancellationToken,
    ) -> ValidationResult {
        let mut result = ValidationResult::new();

        debug!(timeout = ?request.timeout, "Using configured timeout for each egress request");

        if let Err(e) = request.validate() {
            result.record_error(FailureKind::Creation, &e);
            return result;
        }

        let user_data = match self.template.render_for(request, &self.validator_image) {
            Ok(script) => script,
            Err(e) => {
                result.record_error(FailureKind::Creation, &Error::from(e));
                return result;
            }
        };
        debug!("Generated userdata script:\n---\n{}\n---", user_data);

        let name = self.names.generate();
        let mut guard = match self.lifecycle.create(name, request, user_data).await {
            Ok(guard) => guard,
            Err(CreateError { error, orphan }) => {
                error!(error = %error, "Probe instance creation failed");
                result.record_error(FailureKind::Creation, &error);
                if let Some(orphan) = orphan {
                    orphan.release(&self.lifecycle, &mut result).await;
                }
                return result;
            }
        };

        debug!(instance = %guard.instance().name, "Waiting for probe instance to be running");
        if let Err(e) = self
            .lifecycle
            .await_running(guard.instance_mut(), self.readiness_timeout, cancel)
            .await
        {
            error!(
                instance = %guard.instance().name,
                error = %e,
                "Probe instance never became ready"
            );
            result.record_error(control_kind(&e, FailureKind::Lifecycle), &e);
            guard.release(&self.lifecycle, &mut result).await;
            return result;
        }

        info!(instance = %guard.instance().name, "Gathering and parsing console log output");
        match self.analyzer.run(guard.instance(), cancel).await {
            Ok(findings) => findings.record(&mut result),
            Err(e) => {
                let kind = if e.is_timeout() {
                    FailureKind::AnalysisTimeout
                } else {
                    FailureKind::Analysis
                };
                error!(instance = %guard.instance().name, error = %e, "Console analysis failed");
                result.record_error(control_kind(&e, kind), &e);
            }
        }

        guard.release(&self.lifecycle, &mut result).await;

        info!(
            success = result.is_success(),
            failures = result.failures().len(),
            unreachable = result.unreachable_endpoints().len(),
            "Egress validation finished"
        );
        result
    }
}

/// Cancellation is reported as such regardless of which phase it hit
fn control_kind(err: &Error, phase_kind: FailureKind) -> FailureKind {
    if err.is_cancelled() {
        FailureKind::Cancelled
    } else {
        phase_kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{ComputeError, InstanceSpec, MockComputeClient};
    use crate::poll::testing::ManualClock;

    fn config() -> VerifierConfig {
        VerifierConfig {
            project: "proj".to_string(),
            region: "us-east1".to_string(),
            ..Default::default()
        }
    }

    fn controller(client: MockComputeClient) -> EgressController {
        EgressController::with_parts(
            Arc::new(client),
            Arc::new(ManualClock::new()),
            InstanceNameGenerator::seeded(1),
            &config(),
        )
    }

    fn created(client: &mut MockComputeClient) {
        client.expect_insert_instance().times(1).returning(|_| Ok(()));
        client.expect_set_labels().times(1).returning(|_, _| Ok(()));
    }

    // ==========================================================================
    // Story: Every run that creates an instance stops it exactly once
    // ==========================================================================

    #[tokio::test]
    async fn failed_create_never_terminates() {
        let mut client = MockComputeClient::new();
        client
            .expect_insert_instance()
            .times(1)
            .returning(|_| {
                Err(ComputeError::PermissionDenied("compute.instances.create".into()))
            });
        client.expect_stop_instance().never();

        let result = controller(client)
            .validate_egress(&ProbeRequest::new("subnet"))
            .await;

        assert_eq!(result.failures().len(), 1);
        assert_eq!(result.failures()[0].kind, FailureKind::Creation);
        assert!(result.failures()[0].message.contains("compute.instances.create"));
    }

    #[tokio::test]
    async fn failed_labeling_still_terminates() {
        let mut client = MockComputeClient::new();
        client.expect_insert_instance().times(1).returning(|_| Ok(()));
        client
            .expect_set_labels()
            .times(1)
            .returning(|_, _| {
                Err(ComputeError::Api {
                    status: 400,
                    message: "bad label".into(),
                })
            });
        client.expect_stop_instance().times(1).returning(|_| Ok(()));

        let result = controller(client)
            .validate_egress(&ProbeRequest::new("subnet"))
            .await;

        assert!(result.has_failure(FailureKind::Creation));
    }

    #[tokio::test]
    async fn fatal_state_terminates_and_skips_analysis() {
        let mut client = MockComputeClient::new();
        created(&mut client);
        client
            .expect_get_instance_status()
            .returning(|_| Ok("TERMINATED".to_string()));
        client.expect_get_serial_port_output().never();
        client.expect_stop_instance().times(1).returning(|_| Ok(()));

        let result = controller(client)
            .validate_egress(&ProbeRequest::new("subnet"))
            .await;

        assert_eq!(result.failures().len(), 1);
        assert_eq!(result.failures()[0].kind, FailureKind::Lifecycle);
        assert!(result.failures()[0].message.contains("TERMINATED"));
    }

    #[tokio::test]
    async fn readiness_timeout_terminates() {
        let mut client = MockComputeClient::new();
        created(&mut client);
        client
            .expect_get_instance_status()
            .returning(|_| Ok("STAGING".to_string()));
        client.expect_get_serial_port_output().never();
        client.expect_stop_instance().times(1).returning(|_| Ok(()));

        let result = controller(client)
            .validate_egress(&ProbeRequest::new("subnet"))
            .await;

        assert!(result.has_failure(FailureKind::Lifecycle));
        assert!(result.failures()[0].message.contains("timed out"));
    }

    #[tokio::test]
    async fn completed_probe_reports_findings_and_terminates() {
        let mut client = MockComputeClient::new();
        created(&mut client);
        client
            .expect_get_instance_status()
            .returning(|_| Ok("RUNNING".to_string()));
        client.expect_get_serial_port_output().times(1).returning(|_| {
            Ok("USERDATA BEGIN\n\
                Unable to reach host1.example.com\n\
                Failed to connect\n\
                USERDATA END\n"
                .to_string())
        });
        client.expect_stop_instance().times(1).returning(|_| Ok(()));

        let result = controller(client)
            .validate_egress(&ProbeRequest::new("subnet"))
            .await;

        assert_eq!(result.failures().len(), 1);
        assert_eq!(result.failures()[0].kind, FailureKind::Connectivity);
        assert_eq!(result.unreachable_endpoints(), ["host1.example.com"]);
    }

    #[tokio::test]
    async fn analysis_timeout_is_recorded_and_terminates() {
        let mut client = MockComputeClient::new();
        created(&mut client);
        client
            .expect_get_instance_status()
            .returning(|_| Ok("RUNNING".to_string()));
        client
            .expect_get_serial_port_output()
            .returning(|_| {
                Ok("USERDATA BEGIN\nUnable to reach host1.example.com\n".to_string())
            });
        client.expect_stop_instance().times(1).returning(|_| Ok(()));

        let result = controller(client)
            .validate_egress(&ProbeRequest::new("subnet"))
            .await;

        assert_eq!(result.failures().len(), 1);
        assert_eq!(result.failures()[0].kind, FailureKind::AnalysisTimeout);
        assert!(result.unreachable_endpoints().is_empty());
    }

    #[tokio::test]
    async fn teardown_failure_is_recorded_alongside_success() {
        let mut client = MockComputeClient::new();
        created(&mut client);
        client
            .expect_get_instance_status()
            .returning(|_| Ok("RUNNING".to_string()));
        client
            .expect_get_serial_port_output()
            .returning(|_| Ok("USERDATA END".to_string()));
        client
            .expect_stop_instance()
            .times(1)
            .returning(|_| Err(ComputeError::Transport("reset".into())));

        let result = controller(client)
            .validate_egress(&ProbeRequest::new("subnet"))
            .await;

        assert_eq!(result.failures().len(), 1);
        assert_eq!(result.failures()[0].kind, FailureKind::Teardown);
    }

    #[tokio::test]
    async fn cancelled_run_still_terminates() {
        let mut client = MockComputeClient::new();
        created(&mut client);
        client.expect_get_instance_status().never();
        client.expect_stop_instance().times(1).returning(|_| Ok(()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = controller(client)
            .validate_egress_with_cancel(&ProbeRequest::new("subnet"), &cancel)
            .await;

        assert_eq!(result.failures()[0].kind, FailureKind::Cancelled);
    }

    // ==========================================================================
    // Story: Inputs to the create call
    // ==========================================================================

    #[tokio::test]
    async fn default_image_and_marker_reach_the_instance() {
        let mut client = MockComputeClient::new();
        client
            .expect_insert_instance()
            .withf(|spec: &InstanceSpec| {
                spec.source_image.ends_with("/family/cos-97-lts")
                    && spec.user_data.contains(crate::USERDATA_END_MARKER)
                    && spec.name.starts_with("egress-verifier-")
            })
            .times(1)
            .returning(|_| {
                Err(ComputeError::Api {
                    status: 500,
                    message: "stop here".into(),
                })
            });

        let result = controller(client)
            .validate_egress(&ProbeRequest::new("subnet"))
            .await;

        assert!(result.has_failure(FailureKind::Creation));
    }

    #[tokio::test]
    async fn invalid_request_makes_no_calls() {
        let mut client = MockComputeClient::new();
        client.expect_insert_instance().never();

        let result = controller(client).validate_egress(&ProbeRequest::new("")).await;

        assert!(result.has_failure(FailureKind::Creation));
    }
}
