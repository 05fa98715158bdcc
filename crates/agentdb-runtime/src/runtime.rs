use agentdb_identity::wire::{DELEGATION_FILENAME, DELEGATION_MIME};
use agentdb_identity::{AgentKeypair, Delegation, Verification};
use agentdb_store::ContentStore;
use agentdb_stream::{HttpNameBackend, MutableStream, Revision, StreamName};
use agentdb_types::{to_canonical_bytes, AgentDbError, Cid, DenialReason, Did, NameId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::{InMemoryIndex, MemoryIndex, MemoryRecord, RuntimeConfig};

/// Filename memories are stored under.
pub const MEMORY_FILENAME: &str = "memory.json";

/// MIME type of stored memories.
pub const MEMORY_MIME: &str = "application/json";

/// What actually gets content-addressed when an agent stores a memory.
#[derive(Serialize, Deserialize)]
struct MemoryEnvelope {
    agent_id: Did,
    timestamp: Timestamp,
    context: Value,
}

/// A freshly issued delegation in every form a caller might hand on.
#[derive(Clone, Debug)]
pub struct IssuedDelegation {
    pub delegation: Delegation,
    /// Printable form, for bearer headers.
    pub token: String,
    /// Content address of the canonical encoding.
    pub cid: Cid,
}

/// A stream this agent writes to: its signing key and latest revision.
struct OwnedStream {
    name: StreamName,
    head: Revision,
}

/// One agent's view of the system: identity, memory, streams, delegation.
pub struct AgentRuntime {
    keypair: AgentKeypair,
    store: Arc<ContentStore>,
    streams: Arc<MutableStream>,
    index: Arc<dyn MemoryIndex>,
    config: RuntimeConfig,
    /// Each stream's lock is held across its publish so updates stay single-writer.
    owned: Mutex<HashMap<NameId, Arc<tokio::sync::Mutex<OwnedStream>>>>,
}

impl AgentRuntime {
    /// Boot with a fresh identity and services built from `config`.
    pub fn create(config: RuntimeConfig) -> Result<Self, AgentDbError> {
        Self::boot(AgentKeypair::generate(), config)
    }

    /// Boot with the identity derived from `seed`, so the DID survives restarts.
    pub fn from_seed(seed: &[u8], config: RuntimeConfig) -> Result<Self, AgentDbError> {
        Self::boot(AgentKeypair::from_seed(seed), config)
    }

    fn boot(keypair: AgentKeypair, config: RuntimeConfig) -> Result<Self, AgentDbError> {
        let store = Arc::new(ContentStore::new(config.store.clone())?);
        let policy = config.store.retry_policy();
        let streams = match &config.name_service_url {
            Some(url) => {
                let backend = HttpNameBackend::new(url.as_str(), config.store.request_timeout)?;
                MutableStream::new(Arc::new(backend), policy)
            }
            None => MutableStream::in_memory(policy),
        };
        Ok(Self::with_services(
            keypair,
            store,
            Arc::new(streams),
            Arc::new(InMemoryIndex::new()),
            config,
        ))
    }

    /// Assemble from existing services, e.g. to let several agents share one
    /// store, name network and index.
    pub fn with_services(
        keypair: AgentKeypair,
        store: Arc<ContentStore>,
        streams: Arc<MutableStream>,
        index: Arc<dyn MemoryIndex>,
        config: RuntimeConfig,
    ) -> Self {
        info!(did = %keypair.did(), "agent runtime ready");
        Self {
            keypair,
            store,
            streams,
            index,
            config,
            owned: Mutex::new(HashMap::new()),
        }
    }

    pub fn did(&self) -> Did {
        self.keypair.did()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn content_store(&self) -> &ContentStore {
        &self.store
    }

    /// Store `context` as a memory owned by this agent.
    pub async fn store_memory(&self, context: &Value) -> Result<Cid, AgentDbError> {
        let envelope = MemoryEnvelope {
            agent_id: self.did(),
            timestamp: agentdb_types::now(),
            context: context.clone(),
        };
        let bytes = to_canonical_bytes(&envelope)?;
        let cid = self.store.upload(&bytes, MEMORY_FILENAME, MEMORY_MIME).await?;
        let record = self.index.record(MemoryRecord {
            cid: cid.clone(),
            owner: envelope.agent_id,
            created_at: envelope.timestamp,
        });
        info!(%cid, owner = %record.owner, "memory stored");
        Ok(cid)
    }

    /// Fetch a memory's context. Non-owners must present a read delegation
    /// issued by the owner to this agent.
    pub async fn fetch_memory(
        &self,
        cid: &Cid,
        delegation: Option<&Delegation>,
    ) -> Result<Value, AgentDbError> {
        let indexed_owner = self.index.get(cid).map(|record| record.owner);
        if let Some(owner) = &indexed_owner {
            self.authorize(owner, delegation)?;
        }

        let bytes = self.store.fetch(cid, MEMORY_FILENAME).await?;
        let envelope: MemoryEnvelope = serde_json::from_slice(&bytes)
            .map_err(|e| AgentDbError::Serialization(format!("memory {cid}: {e}")))?;
        if indexed_owner.is_none() {
            self.authorize(&envelope.agent_id, delegation)?;
        }
        debug!(%cid, "memory fetched");
        Ok(envelope.context)
    }

    /// Memories this agent owns, oldest first.
    pub fn memories(&self) -> Vec<MemoryRecord> {
        self.index.owned_by(&self.did())
    }

    /// Grant `ability` over this agent's resources to `audience`.
    pub fn delegate_to(
        &self,
        audience: &Did,
        ability: &str,
        ttl_hours: f64,
    ) -> Result<IssuedDelegation, AgentDbError> {
        let delegation = Delegation::issue(&self.keypair, audience, ability, ttl_hours)?;
        let issued = IssuedDelegation {
            token: delegation.to_transport_string(),
            cid: delegation.content_address(),
            delegation,
        };
        info!(
            audience = %audience,
            ability,
            expiration = issued.delegation.expiration(),
            cid = %issued.cid,
            "delegation issued"
        );
        Ok(issued)
    }

    /// Grant read access with the configured ability and default lifetime.
    pub fn grant_read(&self, audience: &Did) -> Result<IssuedDelegation, AgentDbError> {
        self.delegate_to(audience, &self.config.read_ability, self.config.default_ttl_hours)
    }

    /// Check a transport-encoded token. Malformed tokens are a validation
    /// error; well-formed but unacceptable ones are a denied [`Verification`].
    pub fn verify_delegation(
        &self,
        token: &str,
        expected_issuer: &Did,
        ability: &str,
    ) -> Result<Verification, AgentDbError> {
        let delegation = Delegation::from_transport_string(token)?;
        Ok(delegation.verify(expected_issuer, ability, agentdb_types::now()))
    }

    /// Upload a delegation's canonical bytes so it can be handed on by CID.
    pub async fn publish_delegation(&self, delegation: &Delegation) -> Result<Cid, AgentDbError> {
        let cid = self
            .store
            .upload(&delegation.to_bytes(), DELEGATION_FILENAME, DELEGATION_MIME)
            .await?;
        debug!(%cid, "delegation published");
        Ok(cid)
    }

    pub async fn fetch_delegation(&self, cid: &Cid) -> Result<Delegation, AgentDbError> {
        let bytes = self.store.fetch(cid, DELEGATION_FILENAME).await?;
        Delegation::from_bytes(&bytes)
    }

    /// Store `initial` and publish it as revision 0 of a new stream.
    pub async fn start_stream(&self, initial: &Value) -> Result<NameId, AgentDbError> {
        let cid = self.store_memory(initial).await?;
        let name = self.streams.create_name();
        let head = self.streams.publish(&name, &cid, None).await?;
        let id = name.id();
        self.owned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::new(tokio::sync::Mutex::new(OwnedStream { name, head })));
        info!(stream = %id, %cid, "stream started");
        Ok(id)
    }

    /// Store `context` and publish it as the next revision of an owned stream.
    pub async fn update_stream(
        &self,
        stream_id: &NameId,
        context: &Value,
    ) -> Result<Revision, AgentDbError> {
        let slot = self
            .owned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream_id)
            .cloned()
            .ok_or_else(|| AgentDbError::NotFound(format!("stream {stream_id} is not owned here")))?;
        let mut stream = slot.lock().await;

        let cid = self.store_memory(context).await?;
        let head = self.streams.publish(&stream.name, &cid, Some(&stream.head)).await?;
        stream.head = head.clone();
        Ok(head)
    }

    /// Latest content address of a stream, if any revision has been observed.
    pub async fn resolve_stream(&self, stream_id: &NameId) -> Option<Cid> {
        self.streams.resolve(stream_id).await
    }

    /// Fetch a stream's latest context, under the same rules as [`Self::fetch_memory`].
    pub async fn fetch_stream(
        &self,
        stream_id: &NameId,
        delegation: Option<&Delegation>,
    ) -> Result<Value, AgentDbError> {
        let cid = self
            .streams
            .resolve(stream_id)
            .await
            .ok_or_else(|| AgentDbError::NotFound(format!("stream {stream_id}")))?;
        self.fetch_memory(&cid, delegation).await
    }

    fn authorize(&self, owner: &Did, delegation: Option<&Delegation>) -> Result<(), AgentDbError> {
        let reader = self.did();
        if *owner == reader {
            return Ok(());
        }
        let Some(delegation) = delegation else {
            warn!(%owner, %reader, "read without delegation denied");
            return Err(AgentDbError::AuthDenied(DenialReason::DelegationRequired));
        };
        let verdict = delegation.verify(owner, &self.config.read_ability, agentdb_types::now());
        if let Some(reason) = verdict.reason {
            warn!(%owner, %reader, %reason, "read delegation rejected");
        }
        verdict.into_result()?;
        if *delegation.audience() != reader {
            warn!(%owner, %reader, audience = %delegation.audience(), "delegation issued to someone else");
            return Err(AgentDbError::AuthDenied(DenialReason::AudienceMismatch));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentdb_identity::Capability;
    use agentdb_store::{BackendError, StoreConfig};
    use agentdb_stream::{MemoryNameBackend, NameBackend};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn offline_pair() -> (AgentRuntime, AgentRuntime) {
        let config = RuntimeConfig::default();
        let store = Arc::new(ContentStore::offline(StoreConfig::default()));
        let streams = Arc::new(MutableStream::in_memory(config.store.retry_policy()));
        let index: Arc<dyn MemoryIndex> = Arc::new(InMemoryIndex::new());
        let a = AgentRuntime::with_services(
            AgentKeypair::generate(),
            store.clone(),
            streams.clone(),
            index.clone(),
            config.clone(),
        );
        let b = AgentRuntime::with_services(AgentKeypair::generate(), store, streams, index, config);
        (a, b)
    }

    #[tokio::test]
    async fn owner_reads_without_token() {
        let (a, _) = offline_pair();
        let cid = a.store_memory(&json!({"goal": "find-water"})).await.unwrap();
        assert!(cid.is_simulated());
        assert_eq!(a.fetch_memory(&cid, None).await.unwrap(), json!({"goal": "find-water"}));
        assert_eq!(a.memories().len(), 1);
    }

    #[tokio::test]
    async fn expired_delegation_denied() {
        let (a, b) = offline_pair();
        let cid = a.store_memory(&json!({"k": 1})).await.unwrap();
        let stale = Delegation::issue_at(
            &a.keypair,
            &b.did(),
            Capability::new("agent/read").on(a.did().to_string()),
            1.0,
            agentdb_types::now() - 7200,
        )
        .unwrap();
        let err = b.fetch_memory(&cid, Some(&stale)).await.unwrap_err();
        assert!(matches!(err, AgentDbError::AuthDenied(DenialReason::Expired)));
    }

    #[tokio::test]
    async fn wrong_ability_denied() {
        let (a, b) = offline_pair();
        let cid = a.store_memory(&json!({"k": 1})).await.unwrap();
        let write = a.delegate_to(&b.did(), "agent/write", 1.0).unwrap();
        let err = b.fetch_memory(&cid, Some(&write.delegation)).await.unwrap_err();
        assert!(matches!(err, AgentDbError::AuthDenied(DenialReason::CapabilityMismatch)));
    }

    #[tokio::test]
    async fn verify_delegation_reports_reason() {
        let (a, b) = offline_pair();
        let issued = a.grant_read(&b.did()).unwrap();
        let ok = b.verify_delegation(&issued.token, &a.did(), "agent/read").unwrap();
        assert!(ok.valid);
        let wrong = b.verify_delegation(&issued.token, &b.did(), "agent/read").unwrap();
        assert_eq!(wrong.reason, Some(DenialReason::IssuerMismatch));
        assert!(matches!(
            b.verify_delegation("%%%", &a.did(), "agent/read"),
            Err(AgentDbError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn negative_ttl_rejected() {
        let (a, b) = offline_pair();
        assert!(matches!(
            a.delegate_to(&b.did(), "agent/read", 0.0),
            Err(AgentDbError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn update_unknown_stream_is_not_found() {
        let (a, b) = offline_pair();
        let id = b.start_stream(&json!({"v": 0})).await.unwrap();
        let err = a.update_stream(&id, &json!({"v": 1})).await.unwrap_err();
        assert!(matches!(err, AgentDbError::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_updates_stay_sequential() {
        let (a, _) = offline_pair();
        let a = Arc::new(a);
        let id = a.start_stream(&json!({"v": 0})).await.unwrap();

        let mut tasks = Vec::new();
        for i in 1..=8 {
            let a = a.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                a.update_stream(&id, &json!({ "v": i })).await.unwrap().sequence
            }));
        }
        let mut sequences = Vec::new();
        for task in tasks {
            sequences.push(task.await.unwrap());
        }
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=8).collect::<Vec<u64>>());
    }

    /// Name network whose next publish lands but whose reply never arrives.
    #[derive(Default)]
    struct FlakyNames {
        inner: MemoryNameBackend,
        drop_next_ack: AtomicBool,
    }

    #[async_trait]
    impl NameBackend for FlakyNames {
        async fn publish(&self, revision: &Revision) -> Result<(), BackendError> {
            self.inner.publish(revision).await?;
            if self.drop_next_ack.swap(false, Ordering::SeqCst) {
                return Err(BackendError::Transient("response timed out".into()));
            }
            Ok(())
        }

        async fn resolve(&self, name: &NameId) -> Result<Revision, BackendError> {
            self.inner.resolve(name).await
        }
    }

    #[tokio::test]
    async fn stream_updates_survive_lost_ack() {
        let names = Arc::new(FlakyNames::default());
        let policy = agentdb_store::RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let agent = AgentRuntime::with_services(
            AgentKeypair::generate(),
            Arc::new(ContentStore::offline(StoreConfig::default())),
            Arc::new(MutableStream::new(names.clone(), policy)),
            Arc::new(InMemoryIndex::new()),
            RuntimeConfig::default(),
        );
        let id = agent.start_stream(&json!({"v": 0})).await.unwrap();

        names.drop_next_ack.store(true, Ordering::SeqCst);
        for v in 1..=3u64 {
            let rev = agent.update_stream(&id, &json!({ "v": v })).await.unwrap();
            assert_eq!(rev.sequence, v);
        }
        assert_eq!(agent.fetch_stream(&id, None).await.unwrap(), json!({"v": 3}));
    }
}
