use agentdb_types::Cid;
use async_trait::async_trait;

/// Failure reported by a content-addressed backend.
///
/// Classification is structural so retry decisions never depend on message text.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// No credentials or space configured. Upload falls back to simulated storage.
    #[error("no authenticated space configured: {0}")]
    Unauthenticated(String),
    #[error("content not found")]
    NotFound,
    /// Permanent client-side rejection (4xx other than auth/404).
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    /// Connection failures, timeouts, 5xx and 429 responses.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// A network (or local node) that stores blobs under their content address.
#[async_trait]
pub trait BlockBackend: Send + Sync {
    /// Store `bytes`, returning the address the backend assigned.
    async fn put(&self, bytes: &[u8], filename: &str, mime_type: &str)
        -> Result<Cid, BackendError>;

    /// Fetch the blob stored under `cid` as `filename`.
    async fn get(&self, cid: &Cid, filename: &str) -> Result<Vec<u8>, BackendError>;
}
