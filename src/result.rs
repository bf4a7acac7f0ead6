//! Validation run results
//!
//! A [`ValidationResult`] is the only thing a caller gets back from a run. It
//! is append-only while the run executes: control errors, connectivity
//! findings and teardown problems are all recorded here instead of being
//! raised. A result with no failures is a passing run.

use serde::Serialize;

use crate::Error;

/// Category of a recorded failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The probe instance could not be created (no instance exists)
    Creation,
    /// The instance never became ready: fatal state, denied access or timeout
    Lifecycle,
    /// The boot script's completion marker never appeared on the console
    AnalysisTimeout,
    /// The console could not be read
    Analysis,
    /// The completed probe reported connectivity failures
    Connectivity,
    /// The instance could not be stopped
    Teardown,
    /// The caller cancelled the run
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Creation => "creation",
            Self::Lifecycle => "lifecycle",
            Self::AnalysisTimeout => "analysis timeout",
            Self::Analysis => "analysis",
            Self::Connectivity => "egress connectivity",
            Self::Teardown => "teardown",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One classified failure
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// Failure category
    pub kind: FailureKind,
    /// Human-readable description
    pub message: String,
}

/// Outcome of one egress validation run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    failures: Vec<Failure>,
    unreachable_endpoints: Vec<String>,
}

impl ValidationResult {
    /// Empty (passing) result
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure
    pub fn record(&mut self, kind: FailureKind, message: impl Into<String>) -> &mut Self {
        self.failures.push(Failure {
            kind,
            message: message.into(),
        });
        self
    }

    /// Record an error as a failure of the given kind
    pub fn record_error(&mut self, kind: FailureKind, err: &Error) -> &mut Self {
        self.record(kind, err.to_string())
    }

    /// Append unreachable endpoints, preserving order
    pub fn add_unreachable_endpoints<I, S>(&mut self, endpoints: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unreachable_endpoints
            .extend(endpoints.into_iter().map(Into::into));
        self
    }

    /// All recorded failures, in the order they happened
    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    /// Recorded failures of one kind
    pub fn failures_of(&self, kind: FailureKind) -> impl Iterator<Item = &Failure> {
        self.failures.iter().filter(move |f| f.kind == kind)
    }

    /// Whether a failure of the given kind was recorded
    pub fn has_failure(&self, kind: FailureKind) -> bool {
        self.failures_of(kind).next().is_some()
    }

    /// Endpoints the probe reported as unreachable
    pub fn unreachable_endpoints(&self) -> &[String] {
        &self.unreachable_endpoints
    }

    /// True when no failures were recorded and every endpoint was reachable
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.unreachable_endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_is_success() {
        let result = ValidationResult::new();
        assert!(result.is_success());
        assert!(result.failures().is_empty());
        assert!(result.unreachable_endpoints().is_empty());
    }

    #[test]
    fn failures_accumulate_in_order() {
        let mut result = ValidationResult::new();
        result
            .record(FailureKind::Lifecycle, "stuck")
            .record(FailureKind::Teardown, "stop failed");

        assert!(!result.is_success());
        let kinds: Vec<_> = result.failures().iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![FailureKind::Lifecycle, FailureKind::Teardown]);
        assert!(result.has_failure(FailureKind::Teardown));
        assert!(!result.has_failure(FailureKind::Creation));
    }

    #[test]
    fn record_error_uses_error_display() {
        let mut result = ValidationResult::new();
        result.record_error(FailureKind::Creation, &Error::creation("quota exceeded"));
        assert_eq!(
            result.failures()[0].message,
            "unable to create instance: quota exceeded"
        );
    }

    #[test]
    fn unreachable_endpoints_keep_order_and_repeats() {
        let mut result = ValidationResult::new();
        result.add_unreachable_endpoints(["b.example.com", "a.example.com"]);
        result.add_unreachable_endpoints(vec!["b.example.com".to_string()]);
        assert_eq!(
            result.unreachable_endpoints(),
            ["b.example.com", "a.example.com", "b.example.com"]
        );
        assert!(result.failures().is_empty());
    }

    #[test]
    fn unreachable_endpoints_alone_fail_the_run() {
        let mut result = ValidationResult::new();
        result.add_unreachable_endpoints(["quay.io:443"]);
        assert!(result.failures().is_empty());
        assert!(!result.is_success());
    }

    #[test]
    fn serializes_for_json_output() {
        let mut result = ValidationResult::new();
        result
            .record(FailureKind::AnalysisTimeout, "no marker")
            .add_unreachable_endpoints(["quay.io"]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["failures"][0]["kind"], "analysis_timeout");
        assert_eq!(json["unreachable_endpoints"][0], "quay.io");
    }
}
