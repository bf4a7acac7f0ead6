//! Verifier configuration
//!
//! Settings that stay the same across runs against one project: where probes
//! are placed, how they are labeled, and how long each polling phase may
//! take. Loaded from an optional YAML file; the CLI layers flags on top.
//!
//! ```yaml
//! project: my-project
//! region: us-east1
//! vpcName: shared-vpc
//! readinessTimeout: 2m
//! consoleTimeout: 4m
//! labels:
//!   team: networking
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lifecycle::{Placement, DEFAULT_DISK_SIZE_GB};
use crate::poll::PollConfig;
use crate::{Error, Result, DEFAULT_VALIDATOR_IMAGE};

/// Default time allowed for the probe instance to reach `RUNNING`
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Default interval between console reads
pub const DEFAULT_CONSOLE_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default time allowed for the boot script to finish
pub const DEFAULT_CONSOLE_TIMEOUT: Duration = Duration::from_secs(4 * 60);

/// Label every probe instance carries
pub const OWNER_LABEL: (&str, &str) = ("osd-network-verifier", "owned");

/// Settings shared by all runs against one project
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerifierConfig {
    /// Project that owns the subnet
    pub project: String,
    /// Region of the subnet
    pub region: String,
    /// Zone for the probe; `<region>-b` when unset
    pub zone: Option<String>,
    /// VPC network name, for subnets that must be attached by network
    pub vpc_name: Option<String>,
    /// Extra labels for the probe instance
    pub labels: BTreeMap<String, String>,
    /// Validator container image run by the boot script
    pub validator_image: String,
    /// Boot disk size
    pub disk_size_gb: u32,
    /// Time allowed for the instance to reach `RUNNING`
    #[serde(with = "humantime_serde")]
    pub readiness_timeout: Duration,
    /// Interval between console reads
    #[serde(with = "humantime_serde")]
    pub console_poll_interval: Duration,
    /// Time allowed for the boot script to finish
    #[serde(with = "humantime_serde")]
    pub console_timeout: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            region: String::new(),
            zone: None,
            vpc_name: None,
            labels: BTreeMap::new(),
            validator_image: DEFAULT_VALIDATOR_IMAGE.to_string(),
            disk_size_gb: DEFAULT_DISK_SIZE_GB,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            console_poll_interval: DEFAULT_CONSOLE_POLL_INTERVAL,
            console_timeout: DEFAULT_CONSOLE_TIMEOUT,
        }
    }
}

impl VerifierConfig {
    /// Parse a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::config(format!("invalid config: {}", e)))
    }

    /// Load a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml(&data)
    }

    /// Zone the probe is created in.
    ///
    /// Zone `b` exists in every region and offers the widest set of machine
    /// types, so it is the default.
    pub fn zone(&self) -> String {
        match self.zone.as_deref() {
            Some(zone) if !zone.is_empty() => zone.to_string(),
            _ => format!("{}-b", self.region),
        }
    }

    /// Labels applied to the probe: the owner label plus any configured ones
    pub fn effective_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::from([(OWNER_LABEL.0.to_string(), OWNER_LABEL.1.to_string())]);
        labels.extend(self.labels.clone());
        labels
    }

    /// Placement for probe instances
    pub fn placement(&self) -> Placement {
        Placement {
            project: self.project.clone(),
            region: self.region.clone(),
            zone: self.zone(),
            network: self.vpc_name.clone(),
            labels: self.effective_labels(),
            disk_size_gb: self.disk_size_gb,
        }
    }

    /// Polling settings for the console phase
    pub fn console_poll(&self) -> PollConfig {
        PollConfig::new(self.console_poll_interval, self.console_timeout)
    }

    /// Reject configurations a run cannot use
    pub fn validate(&self) -> Result<()> {
        if self.project.is_empty() {
            return Err(Error::config("project is required"));
        }
        if self.region.is_empty() {
            return Err(Error::config("region is required"));
        }
        if self.readiness_timeout.is_zero() || self.console_timeout.is_zero() {
            return Err(Error::config("polling timeouts must be greater than zero"));
        }
        if self.console_poll_interval.is_zero() {
            return Err(Error::config("console poll interval must be greater than zero"));
        }
        Ok(())
    }
}
