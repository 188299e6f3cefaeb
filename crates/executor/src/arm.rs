//! Azure Resource Manager client.
//!
//! Talks to the compute REST API directly with a bearer token. Power actions
//! are long-running operations: the client follows the
//! `Azure-AsyncOperation` (or `Location`) header until the operation settles
//! or the per-call timeout runs out.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use chaos_core::config::AzureConfig;
use chaos_core::{PowerState, ResourceGroupFilter};

use crate::control::{ResourceControl, ResourceStatus};
use crate::error::ControlError;

const RESOURCE_GROUPS_API_VERSION: &str = "2021-04-01";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ArmClient {
    endpoint: String,
    subscription_id: String,
    token: String,
    api_version: String,
    /// Upper bound on waiting for a long-running operation.
    operation_timeout: Duration,
    client: reqwest::Client,
}

impl ArmClient {
    /// Build a client from runtime config. Fails when the subscription or
    /// token is missing.
    pub fn from_config(config: &AzureConfig, call_timeout: Duration) -> Result<Self, ControlError> {
        let subscription_id = config
            .subscription_id
            .clone()
            .ok_or_else(|| ControlError::Config("AZURE_SUBSCRIPTION_ID not set".into()))?;
        let token = config
            .access_token
            .clone()
            .ok_or_else(|| ControlError::Config("AZURE_ACCESS_TOKEN not set".into()))?;
        let client = reqwest::Client::builder().timeout(call_timeout).build()?;
        Ok(Self {
            endpoint: config.management_endpoint.trim_end_matches('/').to_string(),
            subscription_id,
            token,
            api_version: config.api_version.clone(),
            operation_timeout: call_timeout * 10,
            client,
        })
    }

    fn resource_url(&self, id: &str) -> String {
        format!(
            "{}/{}?api-version={}&$expand=instanceView",
            self.endpoint,
            id.trim_start_matches('/'),
            self.api_version
        )
    }

    fn action_url(&self, id: &str, action: &str) -> String {
        format!(
            "{}/{}/{action}?api-version={}",
            self.endpoint,
            id.trim_start_matches('/'),
            self.api_version
        )
    }

    fn resource_groups_url(&self) -> String {
        format!(
            "{}/subscriptions/{}/resourcegroups?api-version={RESOURCE_GROUPS_API_VERSION}",
            self.endpoint, self.subscription_id
        )
    }

    async fn get(&self, url: &str) -> Result<Response, ControlError> {
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .await?;
        Ok(response)
    }

    async fn post_action(&self, id: &str, action: &str) -> Result<(), ControlError> {
        let response = self
            .client
            .post(self.action_url(id, action))
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(CONTENT_LENGTH, "0")
            .send()
            .await?;
        let response = check(response, id).await?;
        debug!(id, action, status = response.status().as_u16(), "action accepted");

        if response.status() != StatusCode::ACCEPTED {
            return Ok(());
        }
        let headers = response.headers();
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
        let monitor = header("azure-asyncoperation")
            .map(|url| (url, Monitor::AsyncOperation))
            .or_else(|| header(reqwest::header::LOCATION.as_str()).map(|url| (url, Monitor::Location)));
        let interval = retry_after(&response).unwrap_or(DEFAULT_POLL_INTERVAL);
        match monitor {
            Some((url, kind)) => self.wait_for_operation(&url, kind, interval, id).await,
            None => Ok(()),
        }
    }

    /// Poll a long-running operation until it leaves `InProgress`.
    async fn wait_for_operation(
        &self,
        url: &str,
        kind: Monitor,
        interval: Duration,
        id: &str,
    ) -> Result<(), ControlError> {
        let deadline = tokio::time::Instant::now() + self.operation_timeout;
        loop {
            tokio::time::sleep(interval).await;
            let response = check(self.get(url).await?, id).await?;
            if response.status() == StatusCode::ACCEPTED {
                if tokio::time::Instant::now() >= deadline {
                    return Err(ControlError::Decode(format!("operation on {id} still running after timeout")));
                }
                continue;
            }

            let body = response.text().await?;
            match operation_status(&body, kind) {
                OperationStatus::InProgress if tokio::time::Instant::now() < deadline => continue,
                OperationStatus::InProgress => {
                    return Err(ControlError::Decode(format!("operation on {id} still running after timeout")))
                }
                OperationStatus::Succeeded => return Ok(()),
                OperationStatus::Failed(status) => {
                    return Err(ControlError::Api {
                        status: StatusCode::OK.as_u16(),
                        body: format!("operation {status}: {body}"),
                    })
                }
            }
        }
    }
}

#[async_trait]
impl ResourceControl for ArmClient {
    async fn get_by_resource_id(&self, id: &str) -> Result<ResourceStatus, ControlError> {
        let response = check(self.get(&self.resource_url(id)).await?, id).await?;
        let body = response.text().await?;
        parse_resource(&body)
    }

    async fn start(&self, id: &str) -> Result<(), ControlError> {
        self.post_action(id, "start").await
    }

    async fn power_off(&self, id: &str) -> Result<(), ControlError> {
        self.post_action(id, "powerOff").await
    }

    async fn restart(&self, id: &str) -> Result<(), ControlError> {
        self.post_action(id, "restart").await
    }

    async fn list_resource_groups(&self, filter: &ResourceGroupFilter) -> Result<Vec<String>, ControlError> {
        let mut names = Vec::new();
        let mut next = Some(self.resource_groups_url());
        while let Some(url) = next {
            let response = check(self.get(&url).await?, &self.subscription_id).await?;
            let page: ResourceGroupPage = serde_json::from_str(&response.text().await?)
                .map_err(|e| ControlError::Decode(e.to_string()))?;
            names.extend(page.value.into_iter().map(|g| g.name).filter(|n| filter.allows(n)));
            next = page.next_link;
        }
        Ok(names)
    }
}

/// Map non-success responses to errors; 404 becomes [`ControlError::NotFound`].
async fn check(response: Response, id: &str) -> Result<Response, ControlError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ControlError::NotFound(id.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    warn!(id, status = status.as_u16(), "ARM request failed");
    Err(ControlError::Api {
        status: status.as_u16(),
        body,
    })
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// ── Wire types ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ArmResource {
    id: String,
    name: String,
    #[serde(rename = "type")]
    resource_type: String,
    #[serde(default)]
    properties: Option<ArmProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArmProperties {
    #[serde(default)]
    instance_view: Option<InstanceView>,
}

#[derive(Debug, Default, Deserialize)]
struct InstanceView {
    #[serde(default)]
    statuses: Vec<InstanceStatus>,
}

#[derive(Debug, Deserialize)]
struct InstanceStatus {
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceGroupPage {
    #[serde(default)]
    value: Vec<ResourceGroupItem>,
    #[serde(default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResourceGroupItem {
    name: String,
}

/// Which header the operation is tracked through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Monitor {
    /// Answers with `{"status": ...}` until the operation settles.
    AsyncOperation,
    /// Answers 202 while running; any other success means done.
    Location,
}

#[derive(Debug, PartialEq)]
enum OperationStatus {
    InProgress,
    Succeeded,
    Failed(String),
}

fn parse_resource(body: &str) -> Result<ResourceStatus, ControlError> {
    let resource: ArmResource = serde_json::from_str(body).map_err(|e| ControlError::Decode(e.to_string()))?;
    let power_state = resource
        .properties
        .and_then(|p| p.instance_view)
        .unwrap_or_default()
        .statuses
        .iter()
        .find_map(|s| PowerState::from_status_code(&s.code))
        .unwrap_or(PowerState::Unknown);
    Ok(ResourceStatus {
        id: resource.id,
        name: resource.name,
        resource_type: resource.resource_type,
        power_state,
    })
}

fn operation_status(body: &str, kind: Monitor) -> OperationStatus {
    #[derive(Deserialize)]
    struct Operation {
        #[serde(default)]
        status: Option<String>,
    }
    let status = serde_json::from_str::<Operation>(body).ok().and_then(|o| o.status);
    match (status.as_deref(), kind) {
        (Some("Succeeded"), _) => OperationStatus::Succeeded,
        (Some("InProgress"), _) => OperationStatus::InProgress,
        (Some(other), _) => OperationStatus::Failed(other.to_string()),
        // a status monitor that has not said anything readable is not done
        (None, Monitor::AsyncOperation) => OperationStatus::InProgress,
        (None, Monitor::Location) => OperationStatus::Succeeded,
    }
}
