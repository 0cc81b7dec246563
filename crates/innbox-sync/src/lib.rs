mod error;
mod group;
mod service;

pub use error::SyncError;
pub use group::{group_by_thread, ThreadBucket};
pub use service::{SyncReport, SyncService, SyncSettings};
