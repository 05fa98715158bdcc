use agentdb_store::{classify_status, BackendError};
use agentdb_types::{AgentDbError, NameId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::Revision;

/// A network that maps stream names to their latest signed revision.
#[async_trait]
pub trait NameBackend: Send + Sync {
    /// Publish an already-signed revision.
    async fn publish(&self, revision: &Revision) -> Result<(), BackendError>;

    /// Latest revision the network knows for `name`.
    async fn resolve(&self, name: &NameId) -> Result<Revision, BackendError>;
}

/// In-process name registry (for tests and single-process deployments).
#[derive(Default)]
pub struct MemoryNameBackend {
    records: RwLock<HashMap<NameId, Revision>>,
}

impl MemoryNameBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NameBackend for MemoryNameBackend {
    async fn publish(&self, revision: &Revision) -> Result<(), BackendError> {
        revision.verify().map_err(|e| BackendError::Rejected {
            status: 400,
            message: e.to_string(),
        })?;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = records.get(&revision.name) {
            // A retried publish whose first attempt already landed.
            if current == revision {
                return Ok(());
            }
            if current.sequence >= revision.sequence {
                return Err(BackendError::Rejected {
                    status: 409,
                    message: format!(
                        "sequence {} is not newer than {}",
                        revision.sequence, current.sequence
                    ),
                });
            }
        }
        records.insert(revision.name.clone(), revision.clone());
        Ok(())
    }

    async fn resolve(&self, name: &NameId) -> Result<Revision, BackendError> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or(BackendError::NotFound)
    }
}

/// Name service reached over HTTP at `<base>/names/<id>`.
#[derive(Clone)]
pub struct HttpNameBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpNameBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AgentDbError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentDbError::Validation(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl NameBackend for HttpNameBackend {
    async fn publish(&self, revision: &Revision) -> Result<(), BackendError> {
        let url = format!("{}/names/{}", self.base_url, revision.name);
        let resp = self
            .http
            .post(&url)
            .json(revision)
            .send()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(classify_status(status, body))
        }
    }

    async fn resolve(&self, name: &NameId) -> Result<Revision, BackendError> {
        let url = format!("{}/names/{name}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }
        resp.json::<Revision>()
            .await
            .map_err(|e| BackendError::Transient(format!("unreadable revision: {e}")))
    }
}
