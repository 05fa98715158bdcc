use agentdb_types::{Cid, Did, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Who owns a stored memory, and since when.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub cid: Cid,
    pub owner: Did,
    pub created_at: Timestamp,
}

/// Trait for recording and looking up memory ownership.
pub trait MemoryIndex: Send + Sync {
    /// Record a memory. The first owner recorded for a CID is kept; returns
    /// the record now in effect.
    fn record(&self, record: MemoryRecord) -> MemoryRecord;

    /// Look up a memory by CID.
    fn get(&self, cid: &Cid) -> Option<MemoryRecord>;

    /// All memories owned by `owner`, oldest first.
    fn owned_by(&self, owner: &Did) -> Vec<MemoryRecord>;
}

/// In-memory index (for testing and single-process deployments).
#[derive(Clone, Default)]
pub struct InMemoryIndex {
    records: Arc<RwLock<HashMap<Cid, MemoryRecord>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryIndex for InMemoryIndex {
    fn record(&self, record: MemoryRecord) -> MemoryRecord {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(record.cid.clone())
            .or_insert(record)
            .clone()
    }

    fn get(&self, cid: &Cid) -> Option<MemoryRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(cid)
            .cloned()
    }

    fn owned_by(&self, owner: &Did) -> Vec<MemoryRecord> {
        let mut records: Vec<MemoryRecord> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| &r.owner == owner)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.cid.cmp(&b.cid)));
        records
    }
}
