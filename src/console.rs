//! Serial console analysis
//!
//! The boot script writes its progress to the serial console. Output
//! accumulates, and a read taken mid-run can show a partial probe whose
//! failures are not final. Nothing is parsed until the completion marker
//! ([`USERDATA_END_MARKER`]) is present; from then on the text is complete and
//! is scanned exactly once.

use std::sync::{Arc, LazyLock, OnceLock};

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::compute::ComputeClient;
use crate::lifecycle::ProbeInstance;
use crate::poll::{poll_immediate, Clock, PollConfig};
use crate::result::{FailureKind, ValidationResult};
use crate::{Error, Result, USERDATA_END_MARKER};

/// Message recorded when the probe reported connectivity failures
pub const CONNECTIVITY_FAILURE_MESSAGE: &str =
    "internet connectivity problem: please ensure there's internet access in given vpc subnets";

static FAILURE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^.*(?:Cannot|Could not|Failed|command not found).*$")
        .expect("failure line pattern is hardcoded and valid")
});

static UNREACHABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Unable to reach (\S+)").expect("unreachable pattern is hardcoded and valid")
});

/// Signals extracted from a completed console log
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsoleFindings {
    /// Lines that indicate a failed probe step
    pub failure_lines: Vec<String>,
    /// Endpoints named in `Unable to reach <endpoint>` lines, in order
    pub unreachable_endpoints: Vec<String>,
}

impl ConsoleFindings {
    /// Whether any failure-indicator line was found
    pub fn has_connectivity_failure(&self) -> bool {
        !self.failure_lines.is_empty()
    }

    /// Record these findings on a result.
    ///
    /// Any number of failure lines produce a single connectivity failure.
    pub fn record(&self, result: &mut ValidationResult) {
        if self.has_connectivity_failure() {
            result.record(FailureKind::Connectivity, CONNECTIVITY_FAILURE_MESSAGE);
        }
        result.add_unreachable_endpoints(self.unreachable_endpoints.iter().cloned());
    }
}

/// Analyze a console snapshot.
///
/// Returns `None` while the completion marker is absent, whatever else the
/// text contains.
pub fn analyze_console_output(output: &str) -> Option<ConsoleFindings> {
    if !output.contains(USERDATA_END_MARKER) {
        return None;
    }

    let failure_lines = FAILURE_LINE
        .find_iter(output)
        .map(|m| m.as_str().trim_end_matches('\r').to_string())
        .collect();
    let unreachable_endpoints = UNREACHABLE
        .captures_iter(output)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect();

    Some(ConsoleFindings {
        failure_lines,
        unreachable_endpoints,
    })
}

/// Polls a probe instance's console until the boot script completes
pub struct ConsoleLogAnalyzer {
    client: Arc<dyn ComputeClient>,
    clock: Arc<dyn Clock>,
    poll: PollConfig,
}

impl ConsoleLogAnalyzer {
    /// Analyzer polling at `poll.interval` for at most `poll.timeout`
    pub fn new(client: Arc<dyn ComputeClient>, clock: Arc<dyn Clock>, poll: PollConfig) -> Self {
        Self { client, clock, poll }
    }

    /// Wait for the completion marker and return what the console reported.
    ///
    /// A failed console read ends the wait with that error. If the marker never
    /// shows up the result is [`Error::Timeout`].
    pub async fn run(
        &self,
        instance: &ProbeInstance,
        cancel: &CancellationToken,
    ) -> Result<ConsoleFindings> {
        let found = OnceLock::new();
        let client = &self.client;
        let name = instance.name.as_str();
        let slot = &found;

        let outcome = poll_immediate(
            self.clock.as_ref(),
            cancel,
            &self.poll,
            "console output",
            move || async move {
                let output = match client.get_serial_port_output(name).await {
                    Ok(output) => output,
                    Err(e) => return Err(Error::from(e)),
                };

                if output.is_empty() {
                    debug!(
                        instance = %name,
                        "Console output not yet populated with data, continuing to wait"
                    );
                    return Ok(false);
                }

                match analyze_console_output(&output) {
                    None => {
                        debug!(
                            instance = %name,
                            "Console output contains data, but end of userdata script not seen, \
                             continuing to wait"
                        );
                        Ok(false)
                    }
                    Some(findings) => {
                        debug!(instance = %name, "Full console output:\n---\n{}\n---", output);
                        let _ = slot.set(findings);
                        Ok(true)
                    }
                }
            },
        )
        .await;

        outcome.map_err(|e| Error::from_poll("console completion marker", e))?;

        let findings = found.into_inner().unwrap_or_default();
        info!(
            instance = %instance.name,
            failure_lines = findings.failure_lines.len(),
            unreachable = findings.unreachable_endpoints.len(),
            "Probe script completed"
        );
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{ComputeError, MockComputeClient};
    use crate::poll::testing::ManualClock;
    use crate::state::LifecycleState;
    use std::time::Duration;

    const COMPLETE_OK: &str = "\
USERDATA BEGIN
VALIDATOR START
Success!
VALIDATOR END
USERDATA END
";

    fn instance() -> ProbeInstance {
        ProbeInstance {
            name: "egress-verifier-test".to_string(),
            zone: "us-east1-b".to_string(),
            state: LifecycleState::Running,
        }
    }

    fn analyzer(client: MockComputeClient) -> (ConsoleLogAnalyzer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let poll = PollConfig::new(Duration::from_secs(30), Duration::from_secs(240));
        (
            ConsoleLogAnalyzer::new(Arc::new(client), clock.clone(), poll),
            clock,
        )
    }

    // ==========================================================================
    // Story: Pure text analysis
    // ==========================================================================

    #[test]
    fn nothing_is_parsed_before_the_marker() {
        let partial = "USERDATA BEGIN\nUnable to reach quay.io\nFailed to connect\n";
        assert_eq!(analyze_console_output(partial), None);
        assert_eq!(analyze_console_output(""), None);
    }

    #[test]
    fn clean_run_has_no_findings() {
        let findings = analyze_console_output(COMPLETE_OK).expect("marker present");
        assert!(!findings.has_connectivity_failure());
        assert!(findings.unreachable_endpoints.is_empty());
    }

    #[test]
    fn unreachable_hosts_are_collected_in_order() {
        let text = "USERDATA BEGIN\n\
                    Unable to reach host1.example.com\n\
                    Unable to reach host2.example.com\n\
                    USERDATA END\n";
        let findings = analyze_console_output(text).expect("marker present");
        assert_eq!(
            findings.unreachable_endpoints,
            vec!["host1.example.com", "host2.example.com"]
        );
    }

    #[test]
    fn repeated_hosts_are_kept() {
        let text = "Unable to reach a.io:443\n\
                    Unable to reach b.io:443\n\
                    Unable to reach a.io:443\n\
                    USERDATA END";
        let findings = analyze_console_output(text).expect("marker present");
        assert_eq!(
            findings.unreachable_endpoints,
            vec!["a.io:443", "b.io:443", "a.io:443"]
        );
    }

    #[test]
    fn each_failure_indicator_is_its_own_line() {
        let text = "\
ok line
Cannot resolve host
Could not open socket
Failed to connect
docker: command not found
failed lowercase is not a match
USERDATA END
";
        let findings = analyze_console_output(text).expect("marker present");
        assert_eq!(
            findings.failure_lines,
            vec![
                "Cannot resolve host",
                "Could not open socket",
                "Failed to connect",
                "docker: command not found",
            ]
        );
    }

    #[test]
    fn many_failure_lines_record_one_aggregate_failure() {
        let text = "Failed to connect\nFailed again\nCannot continue\nUSERDATA END";
        let mut result = ValidationResult::new();
        analyze_console_output(text)
            .expect("marker present")
            .record(&mut result);

        assert_eq!(result.failures().len(), 1);
        assert_eq!(result.failures()[0].kind, FailureKind::Connectivity);
        assert_eq!(result.failures()[0].message, CONNECTIVITY_FAILURE_MESSAGE);
    }

    #[test]
    fn unreachable_endpoints_recorded_without_failure_lines() {
        let text = "Unable to reach quay.io:443\nUSERDATA END";
        let mut result = ValidationResult::new();
        analyze_console_output(text)
            .expect("marker present")
            .record(&mut result);

        assert!(result.failures().is_empty());
        assert!(!result.is_success());
        assert_eq!(result.unreachable_endpoints(), ["quay.io:443"]);
    }

    // ==========================================================================
    // Story: Polling the console
    // ==========================================================================

    #[tokio::test]
    async fn polls_until_marker_then_parses_once() {
        let mut snapshots = vec![
            String::new(),
            "USERDATA BEGIN\nUnable to reach early.example.com\n".to_string(),
            "USERDATA BEGIN\nUnable to reach early.example.com\nUSERDATA END\n".to_string(),
        ]
        .into_iter();
        let mut client = MockComputeClient::new();
        client
            .expect_get_serial_port_output()
            .times(3)
            .returning(move |_| Ok(snapshots.next().unwrap_or_default()));
        let (analyzer, clock) = analyzer(client);

        let findings = analyzer
            .run(&instance(), &CancellationToken::new())
            .await
            .expect("marker seen");

        assert_eq!(findings.unreachable_endpoints, vec!["early.example.com"]);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(30); 2]);
    }

    #[tokio::test]
    async fn console_read_errors_abort_the_wait() {
        let mut client = MockComputeClient::new();
        client
            .expect_get_serial_port_output()
            .times(1)
            .returning(|_| {
                Err(ComputeError::Api {
                    status: 503,
                    message: "backend error".into(),
                })
            });
        let (analyzer, _) = analyzer(client);

        let err = analyzer
            .run(&instance(), &CancellationToken::new())
            .await
            .expect_err("read error is terminal");

        assert!(matches!(err, Error::Compute(_)));
    }

    #[tokio::test]
    async fn missing_marker_times_out_at_deadline() {
        let mut client = MockComputeClient::new();
        client
            .expect_get_serial_port_output()
            .returning(|_| Ok("USERDATA BEGIN\nFailed to connect\n".to_string()));
        let (analyzer, clock) = analyzer(client);

        let err = analyzer
            .run(&instance(), &CancellationToken::new())
            .await
            .expect_err("marker never appears");

        assert!(err.is_timeout());
        assert_eq!(clock.elapsed(), Duration::from_secs(240));
    }
}
