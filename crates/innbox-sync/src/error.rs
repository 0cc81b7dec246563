use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("provider error: {0}")]
    Graph(#[from] innbox_graph::GraphError),
    #[error("storage error: {0}")]
    Storage(#[from] innbox_storage::StorageError),
    #[error("extraction error: {0}")]
    Extract(#[from] innbox_extract::ExtractError),
}
