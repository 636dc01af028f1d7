//! Task execution service: dispatch isolated tests and poll their results.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One `{key, value}` requirement on the machine a task may run on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub key: String,
    pub value: String,
}

impl Dimension {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputsRef {
    pub isolated: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProperties {
    pub inputs_ref: InputsRef,
    pub extra_args: Vec<String>,
    pub dimensions: Vec<Dimension>,
    pub execution_timeout_secs: String,
    pub io_timeout_secs: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub name: String,
    pub user: String,
    pub priority: String,
    pub expiration_secs: String,
    pub properties: TaskProperties,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputsRef {
    pub isolated: String,
}

/// A task's current state. `state` is `PENDING`, `RUNNING`, `COMPLETED`, or
/// a terminal infrastructure state such as `EXPIRED` or `BOT_DIED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub state: String,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub failure: bool,
    #[serde(default)]
    pub outputs_ref: Option<OutputsRef>,
}

pub const TASK_PENDING: &str = "PENDING";
pub const TASK_RUNNING: &str = "RUNNING";
pub const TASK_COMPLETED: &str = "COMPLETED";

#[async_trait]
pub trait SwarmingApi: Send + Sync {
    /// Dispatch a task; returns the task id.
    async fn new_task(&self, request: &TaskRequest) -> Result<String>;

    /// Poll a task's result.
    async fn result(&self, task_id: &str) -> Result<TaskResult>;
}

/// Swarming client using direct API calls.
pub struct SwarmingClient {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct NewTaskResponse {
    task_id: String,
}

impl SwarmingClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl SwarmingApi for SwarmingClient {
    async fn new_task(&self, request: &TaskRequest) -> Result<String> {
        let url = format!("{}/tasks/new", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .context("failed to dispatch task")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("task service error: {} - {}", status, text);
        }

        let body: NewTaskResponse = response
            .json()
            .await
            .context("failed to parse task dispatch response")?;
        Ok(body.task_id)
    }

    async fn result(&self, task_id: &str) -> Result<TaskResult> {
        let url = format!("{}/task/{}/result", self.base_url, task_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("failed to query task result")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("task service error: {} - {}", status, text);
        }

        response
            .json()
            .await
            .context("failed to parse task result response")
    }
}
