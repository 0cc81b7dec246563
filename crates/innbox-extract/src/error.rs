use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("extraction unavailable: {0}")]
    Unavailable(String),
    #[error("extractor request failed: {0}")]
    Remote(String),
    #[error("extractor response unreadable: {0}")]
    Parse(String),
    #[error("extraction timed out after {0}s")]
    Timeout(u64),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage error: {0}")]
    Storage(#[from] innbox_storage::StorageError),
}
