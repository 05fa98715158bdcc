mod backend;
pub mod config;
mod content_store;
mod http;
pub mod retry;
mod sqlite;

pub use backend::{BackendError, BlockBackend};
pub use config::StoreConfig;
pub use content_store::{validate_filename, ContentStore};
pub use http::{classify as classify_status, HttpBackend};
pub use retry::{with_retry, RetryFailure, RetryPolicy};
pub use sqlite::SqliteBackend;
