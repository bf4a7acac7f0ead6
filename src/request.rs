//! Probe requests
//!
//! A [`ProbeRequest`] is everything the caller decides about one run. It is
//! built before the run and never modified during it.

use std::time::Duration;

use crate::{Error, Result, DEFAULT_IMAGE_FAMILY, DEFAULT_MACHINE_TYPE};

/// Default timeout for each individual egress request made by the probe
pub const DEFAULT_EGRESS_TIMEOUT: Duration = Duration::from_secs(2);

/// Proxy settings forwarded to the probe
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy URL for HTTP egress
    pub http_proxy: Option<String>,
    /// Proxy URL for HTTPS egress
    pub https_proxy: Option<String>,
    /// PEM bundle the probe should trust in addition to the system roots
    pub ca_cert: Option<Vec<u8>>,
    /// Skip TLS verification (for intercepting proxies)
    pub no_tls: bool,
}

/// Parameters of one validation run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeRequest {
    /// Subnet to place the probe in: a bare name or a full subnetwork path
    pub subnet_id: String,
    /// Image family; [`DEFAULT_IMAGE_FAMILY`] when `None`
    pub image_id: Option<String>,
    /// Machine type for the probe instance
    pub machine_type: String,
    /// Timeout for each egress request the probe makes
    pub timeout: Duration,
    /// Proxy settings
    pub proxy: ProxyConfig,
}

impl ProbeRequest {
    /// Request for a subnet with default image, machine type and timeout
    pub fn new(subnet_id: impl Into<String>) -> Self {
        Self {
            subnet_id: subnet_id.into(),
            image_id: None,
            machine_type: DEFAULT_MACHINE_TYPE.to_string(),
            timeout: DEFAULT_EGRESS_TIMEOUT,
            proxy: ProxyConfig::default(),
        }
    }

    /// Set the image family
    pub fn with_image(mut self, image_id: impl Into<String>) -> Self {
        self.image_id = Some(image_id.into());
        self
    }

    /// Set the machine type
    pub fn with_machine_type(mut self, machine_type: impl Into<String>) -> Self {
        self.machine_type = machine_type.into();
        self
    }

    /// Set the per-request egress timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the proxy configuration
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }

    /// Image family the probe boots from
    pub fn effective_image(&self) -> &str {
        match self.image_id.as_deref() {
            Some(image) if !image.is_empty() => image,
            _ => DEFAULT_IMAGE_FAMILY,
        }
    }

    /// Reject requests that cannot produce a meaningful run
    pub fn validate(&self) -> Result<()> {
        if self.subnet_id.trim().is_empty() {
            return Err(Error::validation("subnet id must not be empty"));
        }
        if self.machine_type.trim().is_empty() {
            return Err(Error::validation("machine type must not be empty"));
        }
        if self.timeout.is_zero() {
            return Err(Error::validation("egress timeout must be greater than zero"));
        }
        Ok(())
    }
}
