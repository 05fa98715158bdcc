use agentdb_store::{with_retry, BackendError, RetryPolicy};
use agentdb_types::{AgentDbError, Cid, NameId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::{MemoryNameBackend, NameBackend, Revision, StreamName};

/// Mutable pointers layered over immutable content addresses.
///
/// Publishing appends a signed revision under a name; resolving surfaces the
/// highest-sequence revision this instance has ever verified for that name.
pub struct MutableStream {
    backend: Arc<dyn NameBackend>,
    policy: RetryPolicy,
    observed: Mutex<HashMap<NameId, Revision>>,
}

impl MutableStream {
    pub fn new(backend: Arc<dyn NameBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            observed: Mutex::new(HashMap::new()),
        }
    }

    /// Stream backed by a private in-process name registry.
    pub fn in_memory(policy: RetryPolicy) -> Self {
        Self::new(Arc::new(MemoryNameBackend::new()), policy)
    }

    pub fn create_name(&self) -> StreamName {
        StreamName::generate()
    }

    /// Publish `cid` as the next revision of `name`.
    ///
    /// With no `previous`, the revision is the first (sequence 0).
    pub async fn publish(
        &self,
        name: &StreamName,
        cid: &Cid,
        previous: Option<&Revision>,
    ) -> Result<Revision, AgentDbError> {
        let name_id = name.id();
        let sequence = match previous {
            None => 0,
            Some(prev) if prev.name != name_id => {
                return Err(AgentDbError::Validation(format!(
                    "previous revision belongs to {}, not {name_id}",
                    prev.name
                )));
            }
            Some(prev) => prev.sequence.checked_add(1).ok_or_else(|| {
                AgentDbError::Validation("stream sequence exhausted".into())
            })?,
        };

        let revision = name.sign_revision(sequence, cid.clone());
        let backend = &self.backend;
        let revision_ref = &revision;
        let outcome =
            with_retry(&self.policy, "name_publish", move || backend.publish(revision_ref)).await;
        if let Err(failure) = outcome {
            // After a lost acknowledgement the retry collides with our own
            // earlier attempt; the revision is committed if the service has it.
            let retried_rejection =
                failure.attempts > 1 && matches!(failure.error, BackendError::Rejected { .. });
            if retried_rejection && self.is_committed(&revision).await {
                debug!(name = %name_id, sequence, "earlier publish attempt had already landed");
            } else {
                return Err(match failure.error {
                    BackendError::Rejected { message, .. } => AgentDbError::Validation(message),
                    _ => failure.into_network_error(),
                });
            }
        }

        self.observe(&revision);
        info!(name = %name_id, sequence, %cid, "stream revision published");
        Ok(revision)
    }

    /// Latest content address for `name`, or `None` if none was ever observed.
    pub async fn resolve(&self, name: &NameId) -> Option<Cid> {
        self.resolve_revision(name).await.map(|rev| rev.points_to)
    }

    /// Latest verified revision for `name`.
    ///
    /// A failed or forged lookup never displaces a revision already observed.
    pub async fn resolve_revision(&self, name: &NameId) -> Option<Revision> {
        let backend = &self.backend;
        match with_retry(&self.policy, "name_resolve", move || backend.resolve(name)).await {
            Ok(revision) if revision.name != *name => {
                warn!(%name, returned = %revision.name, "name service returned a foreign revision");
            }
            Ok(revision) => match revision.verify() {
                Ok(()) => self.observe(&revision),
                Err(e) => warn!(%name, sequence = revision.sequence, error = %e, "discarding unverifiable revision"),
            },
            Err(failure) => {
                debug!(%name, attempts = failure.attempts, error = %failure.error, "name lookup failed");
            }
        }
        self.latest_observed(name)
    }

    /// Highest revision seen for `name` without touching the network.
    pub fn latest_observed(&self, name: &NameId) -> Option<Revision> {
        self.observed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    async fn is_committed(&self, revision: &Revision) -> bool {
        let backend = &self.backend;
        let name = &revision.name;
        matches!(
            with_retry(&self.policy, "name_confirm", move || backend.resolve(name)).await,
            Ok(current) if current == *revision
        )
    }

    fn observe(&self, revision: &Revision) {
        let mut observed = self.observed.lock().unwrap_or_else(PoisonError::into_inner);
        match observed.get(&revision.name) {
            Some(current) if current.sequence >= revision.sequence => {}
            _ => {
                observed.insert(revision.name.clone(), revision.clone());
            }
        }
    }
}
