//! Compute Engine implementation of [`ComputeClient`]
//!
//! Talks to the Compute Engine v1 REST API directly with `reqwest`. The
//! client is handed an OAuth2 access token; obtaining and refreshing it is
//! the caller's business. Long-running operations returned by insert and
//! stop are not awaited: the lifecycle polls instance status instead.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::compute::{ComputeClient, ComputeError, InstanceSpec};

/// Base URL of the Compute Engine v1 API
pub const COMPUTE_API_BASE: &str = "https://compute.googleapis.com/compute/v1";

/// Per-call HTTP timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceResource {
    #[serde(default)]
    status: String,
    #[serde(default)]
    label_fingerprint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SerialPortOutput {
    #[serde(default)]
    contents: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineTypeList {
    #[serde(default)]
    items: Vec<MachineType>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MachineType {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
}

/// Compute Engine client scoped to one project and zone
pub struct GcpComputeClient {
    http: reqwest::Client,
    base_url: String,
    project: String,
    zone: String,
    access_token: String,
}

impl GcpComputeClient {
    /// Create a client for `project`/`zone` authenticating with `access_token`
    pub fn new(
        project: impl Into<String>,
        zone: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, ComputeError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ComputeError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: COMPUTE_API_BASE.to_string(),
            project: project.into(),
            zone: zone.into(),
            access_token: access_token.into(),
        })
    }

    /// Point the client at a different API endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn zone_url(&self) -> String {
        format!("{}/projects/{}/zones/{}", self.base_url, self.project, self.zone)
    }

    fn instance_url(&self, name: &str) -> String {
        format!("{}/instances/{}", self.zone_url(), name)
    }

    /// Request body for `instances.insert`
    pub(crate) fn insert_body(&self, spec: &InstanceSpec) -> serde_json::Value {
        let mut interface = json!({ "subnetwork": spec.subnetwork });
        if let Some(network) = &spec.network {
            interface["network"] = json!(network);
        }

        json!({
            "name": spec.name,
            "machineType": format!("zones/{}/machineTypes/{}", self.zone, spec.machine_type),
            "disks": [{
                "boot": true,
                "autoDelete": true,
                "type": "PERSISTENT",
                "initializeParams": {
                    "diskSizeGb": spec.disk_size_gb.to_string(),
                    "sourceImage": spec.source_image,
                }
            }],
            "networkInterfaces": [interface],
            "metadata": {
                "items": [{ "key": "user-data", "value": spec.user_data }]
            }
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ComputeError> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ComputeError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_for_status(status, &body))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ComputeError> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| ComputeError::Decode(e.to_string()))
    }

    async fn get_instance(&self, name: &str) -> Result<InstanceResource, ComputeError> {
        self.send_json(self.http.get(self.instance_url(name))).await
    }
}

/// Map a failed API response to a [`ComputeError`]
pub(crate) fn error_for_status(status: StatusCode, body: &str) -> ComputeError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.trim().to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ComputeError::PermissionDenied(message),
        StatusCode::NOT_FOUND => ComputeError::NotFound(message),
        _ => ComputeError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl ComputeClient for GcpComputeClient {
    async fn insert_instance(&self, spec: &InstanceSpec) -> Result<(), ComputeError> {
        let url = format!("{}/instances", self.zone_url());
        self.send(self.http.post(url).json(&self.insert_body(spec)))
            .await
            .map(|_| ())
    }

    async fn get_instance_status(&self, name: &str) -> Result<String, ComputeError> {
        Ok(self.get_instance(name).await?.status)
    }

    async fn set_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), ComputeError> {
        // setLabels is optimistic-concurrency controlled by the current fingerprint.
        let fingerprint = self.get_instance(name).await?.label_fingerprint;
        let body = json!({
            "labels": labels,
            "labelFingerprint": fingerprint,
        });
        let url = format!("{}/setLabels", self.instance_url(name));
        self.send(self.http.post(url).json(&body)).await.map(|_| ())
    }

    async fn get_serial_port_output(&self, name: &str) -> Result<String, ComputeError> {
        let url = format!("{}/serialPort", self.instance_url(name));
        let output: SerialPortOutput = self.send_json(self.http.get(url)).await?;
        Ok(output.contents)
    }

    async fn stop_instance(&self, name: &str) -> Result<(), ComputeError> {
        let url = format!("{}/stop", self.instance_url(name));
        self.send(self.http.post(url)).await.map(|_| ())
    }

    async fn list_machine_types(&self) -> Result<Vec<String>, ComputeError> {
        let url = format!("{}/machineTypes", self.zone_url());
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(&url);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: MachineTypeList = self.send_json(request).await?;
            debug!(count = page.items.len(), "Fetched machine type page");
            names.extend(page.items.into_iter().map(|m| m.name));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GcpComputeClient {
        GcpComputeClient::new("proj", "us-east1-b", "token").expect("client builds")
    }

    fn spec() -> InstanceSpec {
        InstanceSpec {
            name: "egress-verifier-abc".to_string(),
            machine_type: "e2-standard-2".to_string(),
            source_image: "projects/cos-cloud/global/images/family/cos-97-lts".to_string(),
            subnetwork: "projects/proj/regions/us-east1/subnetworks/s".to_string(),
            network: None,
            user_data: "#!/bin/bash\necho hi\n".to_string(),
            disk_size_gb: 10,
        }
    }

    #[test]
    fn urls_are_zone_scoped() {
        let c = client().with_base_url("http://localhost:8080/compute/v1/");
        assert_eq!(
            c.instance_url("n"),
            "http://localhost:8080/compute/v1/projects/proj/zones/us-east1-b/instances/n"
        );
    }

    #[test]
    fn insert_body_embeds_user_data_and_boot_disk() {
        let body = client().insert_body(&spec());

        assert_eq!(body["name"], "egress-verifier-abc");
        assert_eq!(body["machineType"], "zones/us-east1-b/machineTypes/e2-standard-2");
        assert_eq!(body["disks"][0]["boot"], true);
        assert_eq!(body["disks"][0]["autoDelete"], true);
        assert_eq!(body["disks"][0]["initializeParams"]["diskSizeGb"], "10");
        assert_eq!(
            body["networkInterfaces"][0]["subnetwork"],
            "projects/proj/regions/us-east1/subnetworks/s"
        );
        assert!(body["networkInterfaces"][0].get("network").is_none());
        assert_eq!(body["metadata"]["items"][0]["key"], "user-data");
        assert_eq!(body["metadata"]["items"][0]["value"], "#!/bin/bash\necho hi\n");
    }

    #[test]
    fn insert_body_names_network_when_given() {
        let mut s = spec();
        s.network = Some("projects/proj/global/networks/vpc".to_string());
        let body = client().insert_body(&s);
        assert_eq!(
            body["networkInterfaces"][0]["network"],
            "projects/proj/global/networks/vpc"
        );
    }

    #[test]
    fn auth_failures_are_permission_denied() {
        let body =
            r#"{"error":{"code":403,"message":"Required 'compute.instances.get' permission"}}"#;
        assert_eq!(
            error_for_status(StatusCode::FORBIDDEN, body),
            ComputeError::PermissionDenied("Required 'compute.instances.get' permission".into())
        );
        assert!(error_for_status(StatusCode::UNAUTHORIZED, "").is_permission_denied());
    }

    #[test]
    fn other_statuses_keep_code_and_raw_body() {
        assert!(matches!(
            error_for_status(StatusCode::NOT_FOUND, "{}"),
            ComputeError::NotFound(_)
        ));
        assert_eq!(
            error_for_status(StatusCode::SERVICE_UNAVAILABLE, "backend down\n"),
            ComputeError::Api {
                status: 503,
                message: "backend down".into()
            }
        );
    }
}
