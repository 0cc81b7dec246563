mod error;
mod service;

pub use error::OutboundError;
pub use service::{OutboundService, SendRequest};
