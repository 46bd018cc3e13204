//! Connection Registry
//!
//! The authoritative set of open connections. Backed by a sharded
//! [`DashMap`] so registrations, removals and broadcast snapshots on
//! different keys proceed without a global lock.

use std::sync::Arc;

use dashmap::DashMap;

use crate::network::connection::{Connection, ConnectionId};

/// Concurrent map from connection id to live connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `id`.
    pub fn put(&self, id: ConnectionId, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        self.connections.insert(id, connection)
    }

    /// Remove the entry for `id`. Absent ids are a no-op.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.remove(id).map(|(_, conn)| conn)
    }

    /// Look up a single connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Handles of all currently registered connections.
    ///
    /// Each shard is read-locked only while its handles are cloned; the
    /// returned vector is iterated with no lock held.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use tokio::sync::mpsc;

    fn make_conn(id: ConnectionId) -> Arc<Connection> {
        let (tx, _rx) = mpsc::channel(1);
        Arc::new(Connection::new(id, tx))
    }

    #[test]
    fn test_put_and_snapshot() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::next();
        registry.put(id, make_conn(id));

        assert!(registry.contains(&id));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), id);
    }

    #[test]
    fn test_put_overwrites() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::next();
        assert!(registry.put(id, make_conn(id)).is_none());
        assert!(registry.put(id, make_conn(id)).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let registry = ConnectionRegistry::new();
        let keep = ConnectionId::next();
        registry.put(keep, make_conn(keep));

        assert!(registry.remove(&ConnectionId::next()).is_none());
        assert!(registry.remove(&keep).is_some());
        assert!(registry.remove(&keep).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_survives_concurrent_mutation() {
        let registry = ConnectionRegistry::new();
        let ids: Vec<_> = (0..8).map(|_| ConnectionId::next()).collect();
        for id in &ids {
            registry.put(*id, make_conn(*id));
        }

        let snapshot = registry.snapshot();
        // Mutating while holding the snapshot must not deadlock
        for conn in &snapshot {
            registry.remove(&conn.id());
            let fresh = ConnectionId::next();
            registry.put(fresh, make_conn(fresh));
        }
        assert_eq!(snapshot.len(), 8);
        assert_eq!(registry.len(), 8);
        assert!(ids.iter().all(|id| !registry.contains(id)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_put_remove_from_tasks() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut handles = Vec::new();

        for task in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let mut survivors = Vec::new();
                for i in 0..50 {
                    let id = ConnectionId::next();
                    registry.put(id, make_conn(id));
                    if (task + i) % 3 == 0 {
                        survivors.push(id);
                    } else {
                        registry.remove(&id);
                    }
                    tokio::task::yield_now().await;
                }
                survivors
            }));
        }

        let mut expected = BTreeSet::new();
        for handle in handles {
            expected.extend(handle.await.unwrap());
        }

        let actual: BTreeSet<_> = registry.ids().into_iter().collect();
        assert_eq!(actual, expected);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(usize),
        Remove(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..8).prop_map(Op::Put),
            (0usize..8).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn prop_final_keys_match_net_effect(ops in proptest::collection::vec(op_strategy(), 0..64)) {
            let keys: Vec<_> = (0..8).map(|_| ConnectionId::next()).collect();
            let registry = ConnectionRegistry::new();
            let mut model = BTreeSet::new();

            for op in &ops {
                match op {
                    Op::Put(k) => {
                        registry.put(keys[*k], make_conn(keys[*k]));
                        model.insert(keys[*k]);
                    }
                    Op::Remove(k) => {
                        registry.remove(&keys[*k]);
                        model.remove(&keys[*k]);
                    }
                }
            }

            let actual: BTreeSet<_> = registry.ids().into_iter().collect();
            prop_assert_eq!(actual, model);
        }
    }
}
