//! `egress-verifier egress` - run one egress validation

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use egress_verifier::config::VerifierConfig;
use egress_verifier::gcp::{GcpComputeClient, COMPUTE_API_BASE};
use egress_verifier::preflight::validate_machine_type;
use egress_verifier::{
    EgressController, ProbeRequest, ProxyConfig, ValidationResult, DEFAULT_MACHINE_TYPE,
};

use crate::output::{render, OutputFormat};
use crate::{Error, Result};

/// Egress validation arguments
#[derive(Args, Debug)]
pub struct EgressArgs {
    /// Subnet to probe: a subnet name in the configured region, or a full
    /// `projects/<p>/regions/<r>/subnetworks/<s>` path
    #[arg(long)]
    pub subnet_id: String,

    /// Image family for the probe instance (defaults to cos-97-lts)
    #[arg(long)]
    pub image_id: Option<String>,

    /// Machine type for the probe instance
    #[arg(long, default_value = DEFAULT_MACHINE_TYPE)]
    pub instance_type: String,

    /// Timeout for each egress request made by the probe (e.g. 2s, 500ms)
    #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
    pub timeout: Duration,

    /// HTTP proxy for probe egress
    #[arg(long)]
    pub http_proxy: Option<String>,

    /// HTTPS proxy for probe egress
    #[arg(long)]
    pub https_proxy: Option<String>,

    /// PEM file with the proxy's CA certificate
    #[arg(long)]
    pub cacert: Option<PathBuf>,

    /// Skip TLS verification of proxied requests
    #[arg(long)]
    pub no_tls: bool,

    /// Project owning the subnet
    #[arg(long, env = "GCP_PROJECT")]
    pub project: Option<String>,

    /// Region of the subnet
    #[arg(long, env = "GCP_REGION")]
    pub region: Option<String>,

    /// Zone for the probe instance (defaults to <region>-b)
    #[arg(long)]
    pub zone: Option<String>,

    /// VPC network name, when the subnet must be attached by network
    #[arg(long, env = "GCP_VPC_NAME")]
    pub vpc_name: Option<String>,

    /// YAML configuration file; flags override its values
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// OAuth2 access token for the Compute Engine API
    #[arg(long, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: String,

    /// Compute Engine API endpoint (e.g. a Private Service Connect address)
    #[arg(long, env = "COMPUTE_API_ENDPOINT", default_value = COMPUTE_API_BASE)]
    pub api_endpoint: String,

    /// Skip checking that the machine type exists in the zone
    #[arg(long)]
    pub skip_machine_type_check: bool,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

impl EgressArgs {
    /// Load the config file, if any, and apply flag overrides
    pub fn verifier_config(&self) -> Result<VerifierConfig> {
        let mut config = match &self.config {
            Some(path) => VerifierConfig::load(path)?,
            None => VerifierConfig::default(),
        };

        if let Some(project) = &self.project {
            config.project = project.clone();
        }
        if let Some(region) = &self.region {
            config.region = region.clone();
        }
        if let Some(zone) = &self.zone {
            config.zone = Some(zone.clone());
        }
        if let Some(vpc) = &self.vpc_name {
            config.vpc_name = Some(vpc.clone());
        }

        config.validate()?;
        Ok(config)
    }

    /// Build the probe request from flags
    pub fn probe_request(&self) -> Result<ProbeRequest> {
        let ca_cert = match &self.cacert {
            Some(path) => Some(std::fs::read(path).map_err(|e| {
                Error::validation(format!("failed to read {}: {}", path.display(), e))
            })?),
            None => None,
        };

        let mut request = ProbeRequest::new(self.subnet_id.clone())
            .with_machine_type(self.instance_type.clone())
            .with_timeout(self.timeout)
            .with_proxy(ProxyConfig {
                http_proxy: self.http_proxy.clone(),
                https_proxy: self.https_proxy.clone(),
                ca_cert,
                no_tls: self.no_tls,
            });
        if let Some(image) = &self.image_id {
            request = request.with_image(image.clone());
        }

        request.validate()?;
        Ok(request)
    }
}

/// Run the egress validation and print the report
pub async fn run(args: EgressArgs) -> Result<()> {
    let config = args.verifier_config()?;
    let request = args.probe_request()?;

    let client = Arc::new(
        GcpComputeClient::new(
            config.project.clone(),
            config.zone(),
            args.access_token.clone(),
        )?
        .with_base_url(args.api_endpoint.clone()),
    );

    if !args.skip_machine_type_check {
        validate_machine_type(client.as_ref(), &request.machine_type).await?;
    }

    info!(
        project = %config.project,
        zone = %config.zone(),
        subnet = %request.subnet_id,
        "Starting egress validation"
    );

    let controller = EgressController::new(client, &config);
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping the probe instance before exiting");
                cancel.cancel();
            }
        })
    };

    let result = controller
        .validate_egress_with_cancel(&request, &cancel)
        .await;
    interrupt.abort();

    println!("{}", render(&result, args.output)?);
    exit_status(&result)
}

/// Map a finished run to the command's outcome
pub fn exit_status(result: &ValidationResult) -> Result<()> {
    if result.is_success() {
        Ok(())
    } else {
        Err(Error::EgressFailed {
            failures: result.failures().len(),
            unreachable: result.unreachable_endpoints().len(),
        })
    }
}
