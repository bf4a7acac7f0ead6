//! Boot script templating
//!
//! The probe's boot script is a shell template rendered with minijinja using
//! `${VAR}` variable delimiters, so the template reads like the shell it
//! produces. Undefined variables are an error rather than an empty string.
//! `$${` renders as a literal `${` for shell expansions that must survive
//! templating.

use std::collections::BTreeMap;
use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};

use crate::{ProbeRequest, USERDATA_BEGIN_MARKER, USERDATA_END_MARKER};

/// Embedded boot script template
pub const USERDATA_TEMPLATE: &str = include_str!("templates/userdata.sh");

/// Printed by the script right before the validator container starts
pub const VALIDATOR_START_MARKER: &str = "VALIDATOR START";

/// Printed by the script right after the validator container exits
pub const VALIDATOR_END_MARKER: &str = "VALIDATOR END";

/// Region the validator container resolves its endpoint list for
const VALIDATOR_REGION: &str = "us-east-2";

/// Placeholder for escaped `$${` during preprocessing
const ESCAPED_PLACEHOLDER: &str = "\x00__EGRESS_ESCAPED_DOLLAR_BRACE__\x00";

/// Errors that can occur while rendering the boot script
#[derive(Debug)]
pub enum TemplateError {
    /// Template rendering failed
    Render(minijinja::Error),
    /// The template references a variable that was not supplied
    Undefined(String),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Render(e) => write!(f, "userdata render error: {}", e),
            Self::Undefined(detail) => {
                write!(f, "userdata references undefined variable: {}", detail)
            }
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Render(e) => Some(e),
            Self::Undefined(_) => None,
        }
    }
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        if err.kind() == ErrorKind::UndefinedError {
            Self::Undefined(err.detail().unwrap_or("unknown").to_string())
        } else {
            Self::Render(err)
        }
    }
}

/// Renders the probe boot script
pub struct UserdataTemplate {
    env: Environment<'static>,
    source: String,
}

impl Default for UserdataTemplate {
    fn default() -> Self {
        Self::new()
    }
}

impl UserdataTemplate {
    /// Template over the embedded boot script
    pub fn new() -> Self {
        Self::with_source(USERDATA_TEMPLATE)
    }

    /// Template over a caller-supplied script
    ///
    /// # Panics
    ///
    /// Panics if minijinja rejects the hardcoded delimiter configuration,
    /// which would indicate an incompatible minijinja release.
    pub fn with_source(source: impl Into<String>) -> Self {
        let syntax = SyntaxConfig::builder()
            .variable_delimiters("${", "}")
            .block_delimiters("{%", "%}")
            .comment_delimiters("{#", "#}")
            .build()
            .expect("template syntax configuration is hardcoded and valid");

        let mut env = Environment::new();
        env.set_syntax(syntax);
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);

        Self {
            env,
            source: source.into(),
        }
    }

    /// Render the script with the given variables
    pub fn render(&self, variables: &BTreeMap<&str, String>) -> Result<String, TemplateError> {
        let preprocessed = self.source.replace("$${", ESCAPED_PLACEHOLDER);
        let rendered = self.env.render_str(&preprocessed, variables)?;
        Ok(rendered.replace(ESCAPED_PLACEHOLDER, "${"))
    }

    /// Render the script for a probe request
    pub fn render_for(
        &self,
        request: &ProbeRequest,
        validator_image: &str,
    ) -> Result<String, TemplateError> {
        self.render(&userdata_variables(request, validator_image))
    }
}

/// Template variables for a probe request
pub fn userdata_variables(
    request: &ProbeRequest,
    validator_image: &str,
) -> BTreeMap<&'static str, String> {
    let proxy = &request.proxy;
    BTreeMap::from([
        ("AWS_REGION", VALIDATOR_REGION.to_string()),
        ("USERDATA_BEGIN", USERDATA_BEGIN_MARKER.to_string()),
        ("USERDATA_END", USERDATA_END_MARKER.to_string()),
        ("VALIDATOR_START_VERIFIER", VALIDATOR_START_MARKER.to_string()),
        ("VALIDATOR_END_VERIFIER", VALIDATOR_END_MARKER.to_string()),
        ("VALIDATOR_IMAGE", validator_image.to_string()),
        ("TIMEOUT", humantime::format_duration(request.timeout).to_string()),
        ("HTTP_PROXY", proxy.http_proxy.clone().unwrap_or_default()),
        ("HTTPS_PROXY", proxy.https_proxy.clone().unwrap_or_default()),
        ("CACERT", STANDARD.encode(proxy.ca_cert.as_deref().unwrap_or_default())),
        ("NOTLS", proxy.no_tls.to_string()),
    ])
}
