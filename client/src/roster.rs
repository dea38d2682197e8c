//! Client-side cache of the other participants' latest state.

use shared::StateRecord;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Latest known record of every other participant, keyed by id.
///
/// Cheap to clone; clones share the same cache, so the application can read
/// it while the connection's reader task keeps it current.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Arc<RwLock<HashMap<u16, StateRecord>>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: u16) -> Option<StateRecord> {
        self.entries.read().await.get(&id).copied()
    }

    /// All cached records ordered by id.
    pub async fn snapshot(&self) -> Vec<StateRecord> {
        let mut records: Vec<StateRecord> = self.entries.read().await.values().copied().collect();
        records.sort_by_key(|record| record.id);
        records
    }

    pub async fn ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.entries.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Adds a zeroed record for a newly announced participant. Existing
    /// records are left alone.
    pub(crate) async fn add(&self, id: u16) {
        self.entries
            .write()
            .await
            .entry(id)
            .or_insert_with(|| StateRecord::new(id));
    }

    pub(crate) async fn upsert(&self, record: StateRecord) {
        self.entries.write().await.insert(record.id, record);
    }

    pub(crate) async fn remove(&self, id: u16) -> bool {
        self.entries.write().await.remove(&id).is_some()
    }

    pub(crate) async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
