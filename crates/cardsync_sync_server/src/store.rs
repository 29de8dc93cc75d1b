//! Authoritative entity state.

use cardsync_sync_protocol::{EntityKey, EntityType, OperationResult, Payload};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};

/// The server's copy of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    /// User that created the entity.
    pub owner_id: String,
    /// Version counter, bumped on every accepted write.
    pub version: u64,
    /// Current snapshot; `None` once deleted.
    pub payload: Option<Payload>,
}

impl StoredEntity {
    /// Returns true for a deleted entity kept as a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.payload.is_none()
    }
}

/// Identifies one client operation across retries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ReplayKey {
    pub user_id: String,
    pub device_id: String,
    pub op_id: u64,
}

#[derive(Debug, Default)]
struct DeviceLog {
    order: VecDeque<u64>,
    results: HashMap<u64, OperationResult>,
}

/// Results of the most recent operations applied for each device.
///
/// A device resends only what it has not seen answered, which is always
/// among its newest operations, so older results are dropped.
#[derive(Debug, Default)]
pub(crate) struct ReplayLog {
    devices: HashMap<(String, String), DeviceLog>,
}

impl ReplayLog {
    pub fn get(&self, key: &ReplayKey) -> Option<&OperationResult> {
        self.devices
            .get(&(key.user_id.clone(), key.device_id.clone()))
            .and_then(|log| log.results.get(&key.op_id))
    }

    /// Remembers a result, dropping the device's oldest beyond `window`.
    pub fn record(&mut self, key: ReplayKey, result: OperationResult, window: usize) {
        let log = self
            .devices
            .entry((key.user_id, key.device_id))
            .or_default();
        if log.results.insert(key.op_id, result).is_none() {
            log.order.push_back(key.op_id);
        }
        while log.order.len() > window.max(1) {
            if let Some(oldest) = log.order.pop_front() {
                log.results.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.devices.values().map(|log| log.results.len()).sum()
    }
}

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub entities: HashMap<EntityKey, StoredEntity>,
    pub applied: ReplayLog,
}

/// In-memory store keyed by entity type and id.
///
/// Deleted entities stay as tombstones so stale writes still conflict.
/// Results of applied operations are remembered per (user, device,
/// operation id), up to a window per device, and replayed when a client
/// resends an operation.
#[derive(Debug, Default)]
pub struct ServerStore {
    state: Mutex<StoreState>,
}

impl ServerStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets an entity, tombstones included.
    pub fn get(&self, entity_type: EntityType, id: &str) -> Option<StoredEntity> {
        self.state
            .lock()
            .entities
            .get(&EntityKey::new(entity_type, id))
            .cloned()
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .entities
            .values()
            .filter(|e| !e.is_deleted())
            .count()
    }

    /// Returns true if no live entity exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of remembered operation results.
    pub fn applied_count(&self) -> usize {
        self.state.lock().applied.len()
    }

    /// Writes an entity as if another device had synced it.
    ///
    /// Returns the new version.
    pub fn write_remote(
        &self,
        owner_id: &str,
        entity_type: EntityType,
        id: &str,
        payload: Option<Payload>,
    ) -> u64 {
        let mut state = self.state.lock();
        let entry = state
            .entities
            .entry(EntityKey::new(entity_type, id))
            .or_insert_with(|| StoredEntity {
                owner_id: owner_id.to_string(),
                version: 0,
                payload: None,
            });
        entry.version += 1;
        entry.payload = payload;
        entry.version
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remote_writes_bump_versions() {
        let store = ServerStore::new();
        assert!(store.is_empty());

        let payload = Payload::new(json!({"id": "d1"}));
        assert_eq!(
            store.write_remote("u", EntityType::CustomDeck, "d1", Some(payload.clone())),
            1
        );
        assert_eq!(store.write_remote("u", EntityType::CustomDeck, "d1", None), 2);

        let stored = store.get(EntityType::CustomDeck, "d1").unwrap();
        assert!(stored.is_deleted());
        assert_eq!(stored.version, 2);
        assert_eq!(store.len(), 0);
    }

    fn key(device: &str, op_id: u64) -> ReplayKey {
        ReplayKey {
            user_id: "u".into(),
            device_id: device.into(),
            op_id,
        }
    }

    #[test]
    fn replay_log_keeps_a_window_per_device() {
        let mut log = ReplayLog::default();
        for op_id in 1..=5 {
            log.record(key("phone", op_id), OperationResult::accepted("d1", op_id), 3);
        }
        log.record(key("tablet", 1), OperationResult::accepted("d2", 1), 3);

        assert_eq!(log.len(), 4);
        assert!(log.get(&key("phone", 2)).is_none());
        assert_eq!(
            log.get(&key("phone", 3)),
            Some(&OperationResult::accepted("d1", 3))
        );
        assert!(log.get(&key("tablet", 1)).is_some());

        // Recording the same id again does not grow the window.
        log.record(key("phone", 5), OperationResult::accepted("d1", 5), 3);
        assert!(log.get(&key("phone", 3)).is_some());
    }
}
