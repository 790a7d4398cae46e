use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{TaskId, WorkspaceId};

/// A request to start a backend operation (a scan, an import, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub workspace_id: WorkspaceId,
    pub operation: String,
    #[serde(default)]
    pub params: Value,
}

impl OperationRequest {
    pub fn new(workspace_id: impl Into<WorkspaceId>, operation: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            operation: operation.into(),
            params: Value::Null,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// The request/response side of the backend. Progress for submitted work arrives over the
/// event channel, not through this trait.
#[async_trait]
pub trait OperationsApi: Send + Sync {
    /// Start an operation and return the id the backend assigned to its task.
    async fn submit(&self, request: &OperationRequest) -> Result<TaskId>;

    async fn cancel(&self, task_id: &str) -> Result<()>;
}
