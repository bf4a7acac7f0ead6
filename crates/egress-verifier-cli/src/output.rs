//! Report formatting

use std::fmt::Write as _;

use clap::ValueEnum;
use egress_verifier::ValidationResult;

use crate::Result;

/// Report format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary
    #[default]
    Text,
    /// The validation result as JSON
    Json,
}

/// Render a result in the requested format
pub fn render(result: &ValidationResult, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(result)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
    }
}

/// Human-readable summary of a result
pub fn render_text(result: &ValidationResult) -> String {
    let mut out = String::new();

    if result.is_success() {
        out.push_str("Egress validation passed: all required endpoints are reachable\n");
        return out;
    }

    out.push_str("Egress validation failed\n");

    if !result.failures().is_empty() {
        out.push_str("\nFailures:\n");
        for failure in result.failures() {
            let _ = writeln!(out, "  - [{}] {}", failure.kind, failure.message);
        }
    }

    if !result.unreachable_endpoints().is_empty() {
        out.push_str("\nUnreachable endpoints:\n");
        for endpoint in result.unreachable_endpoints() {
            let _ = writeln!(out, "  - {}", endpoint);
        }
    }

    out
}
