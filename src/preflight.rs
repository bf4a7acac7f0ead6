//! Checks that run before a probe instance is created

use tracing::debug;

use crate::compute::ComputeClient;
use crate::{Error, Result};

/// Fail unless `machine_type` is offered in the client's zone
pub async fn validate_machine_type<C: ComputeClient + ?Sized>(
    client: &C,
    machine_type: &str,
) -> Result<()> {
    debug!(machine_type = %machine_type, "Gathering description of instance type");

    let available = client.list_machine_types().await.map_err(|e| {
        Error::validation(format!(
            "unable to gather list of supported instance types: {}",
            e
        ))
    })?;
    debug!(count = available.len(), "Fetched supported instance types");

    if available.iter().any(|name| name == machine_type) {
        debug!(machine_type = %machine_type, "Instance type supported");
        Ok(())
    } else {
        Err(Error::validation(format!(
            "instance type {} not found in zone",
            machine_type
        )))
    }
}
