use stagehand_common::types::WorkspaceId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("the user does not have permission to view workspace `{workspace_id}`")]
    AccessDenied { workspace_id: WorkspaceId },

    #[error("workspace `{0}` does not exist")]
    NotFound(WorkspaceId),

    #[error("workspace storage failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}
