use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("mailbox `{0}` has no stored credentials")]
    NotAuthenticated(String),
    #[error("token refresh failed: {0}")]
    Auth(String),
    #[error("provider request failed ({status}): {body}")]
    Fetch { status: u16, body: String },
    #[error("malformed provider payload: {0}")]
    Payload(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("storage error: {0}")]
    Storage(#[from] innbox_storage::StorageError),
}
