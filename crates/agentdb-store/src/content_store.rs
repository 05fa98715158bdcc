use agentdb_types::{AgentDbError, Cid};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::retry::{with_retry, RetryFailure, RetryPolicy};
use crate::{BackendError, BlockBackend, HttpBackend, StoreConfig};

/// Upload/fetch of opaque blobs by content address, with bounded retry and a
/// process-local simulated fallback for environments without a live network.
pub struct ContentStore {
    backend: Option<Arc<dyn BlockBackend>>,
    config: StoreConfig,
    policy: RetryPolicy,
    /// Payloads that could not reach the network, keyed by simulated CID.
    simulated: Mutex<HashMap<Cid, Vec<u8>>>,
}

impl ContentStore {
    /// Store backed by the HTTP content network described by `config`.
    pub fn new(config: StoreConfig) -> Result<Self, AgentDbError> {
        let backend = HttpBackend::new(&config)?;
        Ok(Self::with_backend(Arc::new(backend), config))
    }

    /// Store backed by an arbitrary backend (local node, test double, ...).
    pub fn with_backend(backend: Arc<dyn BlockBackend>, config: StoreConfig) -> Self {
        Self {
            backend: Some(backend),
            policy: config.retry_policy(),
            config,
            simulated: Mutex::new(HashMap::new()),
        }
    }

    /// Store with no network target at all: every upload is simulated.
    pub fn offline(config: StoreConfig) -> Self {
        Self {
            backend: None,
            policy: config.retry_policy(),
            config,
            simulated: Mutex::new(HashMap::new()),
        }
    }

    /// Upload `bytes`. Identical bytes always yield the identical CID.
    pub async fn upload(
        &self,
        bytes: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> Result<Cid, AgentDbError> {
        validate_filename(filename)?;
        if !mime_type.contains('/') {
            return Err(AgentDbError::Validation(format!(
                "invalid MIME type: {mime_type:?}"
            )));
        }

        let Some(backend) = &self.backend else {
            return Ok(self.simulate(bytes));
        };

        match with_retry(&self.policy, "upload", || backend.put(bytes, filename, mime_type)).await
        {
            Ok(cid) => {
                info!(%cid, filename, size = bytes.len(), "content uploaded");
                Ok(cid)
            }
            Err(RetryFailure {
                error: BackendError::Unauthenticated(reason),
                ..
            }) => {
                warn!(%reason, filename, "no authenticated space, using simulated storage");
                Ok(self.simulate(bytes))
            }
            Err(failure) if self.config.simulate_on_failure => {
                warn!(
                    attempts = failure.attempts,
                    error = %failure.error,
                    filename,
                    "upload failed, using simulated storage"
                );
                Ok(self.simulate(bytes))
            }
            Err(failure) => Err(failure.into_network_error()),
        }
    }

    /// Fetch the blob addressed by `cid`. Simulated CIDs are served locally.
    pub async fn fetch(&self, cid: &Cid, filename: &str) -> Result<Vec<u8>, AgentDbError> {
        validate_filename(filename)?;

        if cid.is_simulated() {
            return self
                .simulated
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(cid)
                .cloned()
                .ok_or_else(|| AgentDbError::NotFound(cid.to_string()));
        }

        let Some(backend) = &self.backend else {
            return Err(AgentDbError::NotFound(cid.to_string()));
        };

        match with_retry(&self.policy, "fetch", || backend.get(cid, filename)).await {
            Ok(bytes) => {
                debug!(%cid, filename, size = bytes.len(), "content fetched");
                Ok(bytes)
            }
            Err(RetryFailure {
                error: BackendError::NotFound,
                ..
            }) => Err(AgentDbError::NotFound(cid.to_string())),
            Err(failure) => Err(failure.into_network_error()),
        }
    }

    /// Public gateway URL for a CID.
    pub fn gateway_url(&self, cid: &Cid) -> String {
        format!("{}/ipfs/{cid}", self.config.gateway_url.trim_end_matches('/'))
    }

    /// Number of payloads currently held in simulated storage.
    pub fn simulated_count(&self) -> usize {
        self.simulated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn simulate(&self, bytes: &[u8]) -> Cid {
        let cid = Cid::simulated(bytes);
        self.simulated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(cid.clone())
            .or_insert_with(|| bytes.to_vec());
        debug!(%cid, size = bytes.len(), "stored in simulated storage");
        cid
    }
}

/// Filenames are a single path segment: no separators, no traversal.
pub fn validate_filename(filename: &str) -> Result<(), AgentDbError> {
    let ok = !filename.is_empty()
        && filename.len() <= 255
        && filename != "."
        && filename != ".."
        && !filename.contains(['/', '\\', '\0', '?', '#']);
    if ok {
        Ok(())
    } else {
        Err(AgentDbError::Validation(format!(
            "invalid filename: {filename:?}"
        )))
    }
}
