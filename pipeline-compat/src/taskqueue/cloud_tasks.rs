//! Google Cloud Tasks backend.
//!
//! Talks to the Cloud Tasks v2 REST API directly:
//! `POST {endpoint}/v2/projects/{p}/locations/{l}/queues/{q}/tasks`.
//!
//! Each relative task URL is resolved against the configured target host
//! (see [`CloudTasksConfig::target_url`]). Named tasks become
//! `{queue_path}/tasks/{name}`, which is what gives the service its dedup
//! behavior.

use async_trait::async_trait;
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use super::{SubmissionResult, Task, TaskBackend};
use crate::auth::{AccessTokenProvider, MetadataServerTokenProvider};
use crate::config::{CloudTasksConfig, ENV_GOOGLE_CLOUD_PROJECT};
use crate::errors::{ConfigurationError, DispatchError, Result};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskRequest {
    task: CloudTask,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CloudTask {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    http_request: HttpRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    schedule_time: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpRequest {
    url: String,
    http_method: &'static str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    oidc_token: Option<OidcToken>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OidcToken {
    service_account_email: String,
    audience: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    name: String,
}

/// Task backend for Google Cloud Tasks.
pub struct CloudTasksBackend {
    config: CloudTasksConfig,
    tokens: Arc<dyn AccessTokenProvider>,
    client: reqwest::Client,
}

impl fmt::Debug for CloudTasksBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudTasksBackend")
            .field("config", &self.config)
            .field("tokens", &"<AccessTokenProvider>")
            .finish_non_exhaustive()
    }
}

impl CloudTasksBackend {
    /// Creates a backend.
    ///
    /// # Errors
    ///
    /// `CompatError::Configuration` if no project is configured or the HTTP
    /// client cannot be built.
    pub fn new(config: CloudTasksConfig, tokens: Arc<dyn AccessTokenProvider>) -> Result<Self> {
        if config.project_id.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigurationError::missing([ENV_GOOGLE_CLOUD_PROJECT]).into());
        }
        if config.location.is_empty() {
            return Err(ConfigurationError::invalid("location", "cannot be empty").into());
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout()?)
            .build()
            .map_err(|e| {
                ConfigurationError::invalid("http_client", format!("failed to build: {e}"))
            })?;

        Ok(Self {
            config,
            tokens,
            client,
        })
    }

    /// Creates a backend that authenticates with the metadata server.
    pub fn with_metadata_server(config: CloudTasksConfig) -> Result<Self> {
        let tokens = MetadataServerTokenProvider::new()?;
        Self::new(config, Arc::new(tokens))
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CloudTasksConfig {
        &self.config
    }

    fn build_request(&self, queue_path: &str, task: &Task) -> CreateTaskRequest {
        let (relative_url, body) = task.payload();
        let url = self.config.target_url(&relative_url);

        let headers: BTreeMap<String, String> = task.delivery_headers().into_iter().collect();
        let body = (!body.is_empty())
            .then(|| base64::engine::general_purpose::STANDARD.encode(&body));

        let oidc_token = self
            .config
            .service_account_email
            .as_ref()
            .map(|email| OidcToken {
                service_account_email: email.clone(),
                audience: self.config.target_url(""),
            });

        CreateTaskRequest {
            task: CloudTask {
                name: task
                    .name
                    .as_ref()
                    .map(|name| format!("{queue_path}/tasks/{name}")),
                http_request: HttpRequest {
                    url,
                    http_method: task.method.as_str(),
                    headers,
                    body,
                    oidc_token,
                },
                schedule_time: task
                    .schedule_time(Utc::now())
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Nanos, true)),
            },
        }
    }
}

/// Returns the short task id from a full task resource name.
fn short_task_name(resource: &str) -> &str {
    resource.rsplit_once("/tasks/").map_or(resource, |(_, id)| id)
}

/// Maps a conflict response onto the matching dedup outcome.
fn conflict_outcome(message: &str, task_name: String) -> SubmissionResult {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("tombstone") || lowered.contains("recently") {
        SubmissionResult::Tombstoned { task_name }
    } else {
        SubmissionResult::AlreadyExists { task_name }
    }
}

#[async_trait]
impl TaskBackend for CloudTasksBackend {
    async fn create_task(&self, queue_name: &str, task: &Task) -> Result<SubmissionResult> {
        let queue_path = self.config.queue_path(queue_name)?;
        let request = self.build_request(&queue_path, task);
        let token = self.tokens.access_token().await?;

        let api_url = format!(
            "{}/v2/{queue_path}/tasks",
            self.config.api_endpoint.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&api_url)
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await
            .map_err(|e| DispatchError::unavailable(format!("Cloud Tasks request failed: {e}")))?;

        let status = response.status();

        if status.is_success() {
            // The task exists even when the body is unreadable.
            return match response.json::<CreatedTask>().await {
                Ok(created) => Ok(SubmissionResult::Enqueued {
                    task_name: short_task_name(&created.name).to_string(),
                }),
                Err(e) => match &task.name {
                    Some(name) => {
                        warn!(task_name = %name, error = %e, "Unreadable Cloud Tasks response");
                        Ok(SubmissionResult::Enqueued {
                            task_name: name.clone(),
                        })
                    }
                    None => Err(DispatchError::rejected(format!(
                        "Task created but the Cloud Tasks response was unreadable: {e}"
                    ))
                    .into()),
                },
            };
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        let (message, detail) = match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(parsed) => (
                parsed.error.message.clone(),
                format!("{} ({})", parsed.error.message, parsed.error.status),
            ),
            Err(_) => (body.clone(), format!("{status} - {body}")),
        };

        if status == reqwest::StatusCode::CONFLICT {
            let task_name = task.name.clone().unwrap_or_default();
            return Ok(conflict_outcome(&message, task_name));
        }

        Err(
            DispatchError::from_status(status.as_u16(), format!("Cloud Tasks API error: {detail}"))
                .into(),
        )
    }

    fn backend_name(&self) -> &'static str {
        "cloud_tasks"
    }
}
