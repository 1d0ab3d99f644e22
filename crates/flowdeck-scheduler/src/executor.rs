//! Workflow executors. The scheduler only sees success or failure.

use async_trait::async_trait;
use flowdeck_core::{FlowError, Result};
use std::time::Duration;

use crate::workflow::WorkflowDefinition;

/// Runs a workflow graph to completion.
///
/// An `Err(FlowError::Executor(_))` means the workflow itself failed.
#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    async fn run(&self, workflow: &WorkflowDefinition) -> Result<()>;

    /// Short label for logs and status output.
    fn name(&self) -> &'static str {
        "custom"
    }
}

/// Logs each run and reports success. Used when no executor service is configured.
#[derive(Debug, Default, Clone)]
pub struct LogExecutor;

#[async_trait]
impl WorkflowExecutor for LogExecutor {
    async fn run(&self, workflow: &WorkflowDefinition) -> Result<()> {
        tracing::info!(
            "📣 [{}] would run {} node(s), {} edge(s) (no executor endpoint configured)",
            workflow.name,
            workflow.graph.nodes.len(),
            workflow.graph.edges.len()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// POSTs the workflow to an executor service; any 2xx is success.
pub struct HttpExecutor {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpExecutor {
    pub fn new(endpoint: &str, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn payload(workflow: &WorkflowDefinition) -> serde_json::Value {
        serde_json::json!({
            "workflowId": workflow.id,
            "name": workflow.name,
            "nodes": workflow.graph.nodes,
            "edges": workflow.graph.edges,
            "trigger": "schedule",
        })
    }
}

#[async_trait]
impl WorkflowExecutor for HttpExecutor {
    async fn run(&self, workflow: &WorkflowDefinition) -> Result<()> {
        tracing::info!("🌐 Executing workflow '{}' via {}", workflow.name, self.endpoint);

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&Self::payload(workflow))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FlowError::Executor(format!("executor request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        let detail: String = body.chars().take(200).collect();
        Err(FlowError::Executor(format!("executor returned {status}: {detail}")))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Pick the executor for the given optional endpoint.
pub fn from_endpoint(endpoint: Option<&str>, timeout_secs: u64) -> std::sync::Arc<dyn WorkflowExecutor> {
    match endpoint.filter(|e| !e.trim().is_empty()) {
        Some(url) => std::sync::Arc::new(HttpExecutor::new(url, timeout_secs)),
        None => std::sync::Arc::new(LogExecutor),
    }
}
