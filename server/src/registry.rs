//! Authoritative map from participant id to its connection and latest state.
//!
//! The registry itself is not synchronized; [`crate::session::Session`] keeps it
//! behind a mutex so per-connection handlers and the periodic ticks serialize
//! their mutations.

use shared::StateRecord;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

/// One active participant as the server sees it.
#[derive(Debug)]
pub struct ConnectionEntry {
    pub id: u16,
    /// Process-unique number of the transport that holds `id`.
    pub serial: u64,
    /// Outbound queue drained by the connection's writer task.
    pub sender: mpsc::Sender<Message>,
    pub latest: StateRecord,
    pub last_liveness: Instant,
}

impl ConnectionEntry {
    /// Creates an entry with a zeroed state record and a fresh liveness stamp.
    pub fn new(id: u16, serial: u64, sender: mpsc::Sender<Message>) -> Self {
        Self {
            id,
            serial,
            sender,
            latest: StateRecord::new(id),
            last_liveness: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: HashMap<u16, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: ConnectionEntry) {
        self.entries.insert(entry.id, entry);
    }

    /// Replaces the latest record of `id` wholesale. Returns false for unknown ids.
    pub fn upsert(&mut self, id: u16, record: StateRecord) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.latest = record;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: u16) -> Option<StateRecord> {
        self.entries.get(&id).map(|entry| entry.latest)
    }

    pub fn remove(&mut self, id: u16) -> Option<ConnectionEntry> {
        self.entries.remove(&id)
    }

    /// Whether `id` is currently held by the transport numbered `serial`.
    pub fn is_held_by(&self, id: u16, serial: u64) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|entry| entry.serial == serial)
    }

    pub fn serial(&self, id: u16) -> Option<u64> {
        self.entries.get(&id).map(|entry| entry.serial)
    }

    /// Snapshot of every active participant's latest record, ordered by id.
    pub fn all_active(&self) -> Vec<(u16, StateRecord)> {
        let mut active: Vec<(u16, StateRecord)> = self
            .entries
            .iter()
            .map(|(id, entry)| (*id, entry.latest))
            .collect();
        active.sort_by_key(|(id, _)| *id);
        active
    }

    /// Outbound queues of every active participant except `exclude`.
    pub fn senders(&self, exclude: Option<u16>) -> Vec<(u16, mpsc::Sender<Message>)> {
        self.entries
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .map(|(id, entry)| (*id, entry.sender.clone()))
            .collect()
    }

    /// Records a liveness reply from `id`. Returns false for unknown ids.
    pub fn touch_liveness(&mut self, id: u16) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.last_liveness = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Time since the last liveness reply from `id`.
    pub fn stale_since(&self, id: u16) -> Option<Duration> {
        self.entries
            .get(&id)
            .map(|entry| entry.last_liveness.elapsed())
    }

    /// Ids whose last liveness reply is older than `threshold`.
    pub fn stale_ids(&self, threshold: Duration) -> Vec<u16> {
        let mut stale: Vec<u16> = self
            .entries
            .keys()
            .copied()
            .filter(|id| self.stale_since(*id).is_some_and(|age| age > threshold))
            .collect();
        stale.sort_unstable();
        stale
    }

    pub fn ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{AnimationState, Orientation, Position};

    fn entry(id: u16, serial: u64) -> (ConnectionEntry, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        (ConnectionEntry::new(id, serial, tx), rx)
    }

    fn moving(id: u16) -> StateRecord {
        StateRecord {
            id,
            position: Position::new(4.0, 5.0, 6.0),
            orientation: Orientation::new(0.0, 1.0),
            state: AnimationState::Walking,
        }
    }

    #[test]
    fn test_new_entry_is_zeroed() {
        let (entry, _rx) = entry(3, 10);
        assert_eq!(entry.latest, StateRecord::new(3));
        assert_eq!(entry.serial, 10);
    }

    #[test]
    fn test_upsert_replaces_record() {
        let mut registry = ConnectionRegistry::new();
        let (e, _rx) = entry(1, 1);
        registry.insert(e);

        assert!(registry.upsert(1, moving(1)));
        assert_eq!(registry.get(1), Some(moving(1)));
    }

    #[test]
    fn test_upsert_unknown_id() {
        let mut registry = ConnectionRegistry::new();
        assert!(!registry.upsert(5, moving(5)));
        assert_eq!(registry.get(5), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove() {
        let mut registry = ConnectionRegistry::new();
        let (e, _rx) = entry(1, 1);
        registry.insert(e);

        assert!(registry.remove(1).is_some());
        assert!(registry.remove(1).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_all_active_is_sorted() {
        let mut registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        for id in [3, 1, 2] {
            let (e, rx) = entry(id, id as u64);
            registry.insert(e);
            receivers.push(rx);
        }
        registry.upsert(2, moving(2));

        let active = registry.all_active();
        let ids: Vec<u16> = active.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(active[1].1, moving(2));
        assert_eq!(registry.ids(), vec![1, 2, 3]);
    }

    #[test]
    fn test_senders_excludes() {
        let mut registry = ConnectionRegistry::new();
        let (a, _ra) = entry(1, 1);
        let (b, _rb) = entry(2, 2);
        registry.insert(a);
        registry.insert(b);

        let ids: Vec<u16> = registry.senders(Some(1)).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(registry.senders(None).len(), 2);
    }

    #[test]
    fn test_is_held_by() {
        let mut registry = ConnectionRegistry::new();
        let (e, _rx) = entry(1, 42);
        registry.insert(e);

        assert!(registry.is_held_by(1, 42));
        assert!(!registry.is_held_by(1, 41));
        assert!(!registry.is_held_by(2, 42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_tracking() {
        let mut registry = ConnectionRegistry::new();
        let (e, _rx) = entry(1, 1);
        registry.insert(e);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(registry.stale_since(1), Some(Duration::from_secs(3)));
        assert!(registry.stale_ids(Duration::from_secs(2)).contains(&1));

        assert!(registry.touch_liveness(1));
        assert_eq!(registry.stale_since(1), Some(Duration::ZERO));
        assert!(registry.stale_ids(Duration::from_secs(2)).is_empty());

        assert!(!registry.touch_liveness(7));
        assert_eq!(registry.stale_since(7), None);
    }
}
