use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("no recipients on outgoing email")]
    NoRecipients,
    #[error("draft {0} not found")]
    DraftNotFound(uuid::Uuid),
    #[error("send failed: {0}")]
    Send(String),
    #[error("provider error: {0}")]
    Graph(#[from] innbox_graph::GraphError),
    #[error("storage error: {0}")]
    Storage(#[from] innbox_storage::StorageError),
}
