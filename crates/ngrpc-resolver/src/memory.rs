//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! In-process coordination store
//!
//! Behaves like a single etcd member for the operations in
//! [`CoordinationStore`]: lease-bound keys disappear on revoke or expiry,
//! keepalive streams close when their lease goes away and prefix watchers see
//! puts and deletes, replaying retained history from a start revision. Time
//! does not pass on its own; call
//! [`MemoryStore::expire`] to simulate a missed TTL and
//! [`MemoryStore::tick`] to emit a keepalive acknowledgement. Individual
//! operations can be made to fail with [`MemoryStore::fail`].

use crate::error::{ResolverError, ResolverResult};
use crate::store::{
    CoordinationStore, KeepAliveAck, KeepAliveStream, Lease, Snapshot, WatchEvent, WatchStream,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

const STREAM_BUFFER: usize = 64;
const HISTORY_LIMIT: usize = 1024;

/// Store operation, used for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Grant,
    Put,
    Delete,
    KeepAlive,
    Revoke,
    Get,
    Watch,
}

struct LeaseState {
    ttl: i64,
    keys: BTreeSet<String>,
    keepers: Vec<mpsc::Sender<KeepAliveAck>>,
}

struct Entry {
    value: Vec<u8>,
    lease: Option<i64>,
}

#[derive(Default)]
struct MemoryState {
    next_lease: i64,
    revision: i64,
    leases: HashMap<i64, LeaseState>,
    entries: BTreeMap<String, Entry>,
    watchers: Vec<(String, mpsc::Sender<WatchEvent>)>,
    history: VecDeque<(i64, WatchEvent)>,
    compacted: i64,
    failures: HashSet<Operation>,
}

impl MemoryState {
    fn check(&self, operation: Operation) -> ResolverResult<()> {
        if self.failures.contains(&operation) {
            return Err(ResolverError::StoreError(format!(
                "injected failure for {:?}",
                operation
            )));
        }
        Ok(())
    }

    fn notify(&mut self, event: WatchEvent) {
        self.watchers.retain(|(_, tx)| !tx.is_closed());
        for (prefix, tx) in &self.watchers {
            if event.key().starts_with(prefix.as_str()) && tx.try_send(event.clone()).is_err() {
                warn!("Dropping watch event for {}: watcher is full", event.key());
            }
        }

        self.history.push_back((self.revision, event));
        if self.history.len() > HISTORY_LIMIT {
            if let Some((revision, _)) = self.history.pop_front() {
                self.compacted = revision;
            }
        }
    }

    /// Retained events under `prefix` at or after `start_revision`
    fn replay(&self, prefix: &str, start_revision: i64) -> ResolverResult<Vec<WatchEvent>> {
        if self.compacted > 0 && start_revision <= self.compacted {
            return Err(ResolverError::StoreError(format!(
                "required revision {} has been compacted",
                start_revision
            )));
        }
        Ok(self
            .history
            .iter()
            .filter(|(revision, event)| {
                *revision >= start_revision && event.key().starts_with(prefix)
            })
            .map(|(_, event)| event.clone())
            .collect())
    }

    fn remove_key(&mut self, key: &str) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        if let Some(lease) = entry.lease.and_then(|id| self.leases.get_mut(&id)) {
            lease.keys.remove(key);
        }
        self.revision += 1;
        self.notify(WatchEvent::Delete {
            key: key.to_string(),
        });
        true
    }

    fn drop_lease(&mut self, lease_id: i64) -> bool {
        let Some(lease) = self.leases.remove(&lease_id) else {
            return false;
        };
        for key in &lease.keys {
            if self.entries.remove(key).is_some() {
                self.revision += 1;
                self.notify(WatchEvent::Delete { key: key.clone() });
            }
        }
        // Dropping the senders closes every keepalive stream on this lease.
        drop(lease.keepers);
        true
    }
}

/// In-process [`CoordinationStore`] for tests and single-process setups
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call of `operation` fail
    pub async fn fail(&self, operation: Operation) {
        self.state.lock().await.failures.insert(operation);
    }

    /// Stop failing `operation`
    pub async fn recover(&self, operation: Operation) {
        self.state.lock().await.failures.remove(&operation);
    }

    /// Current value of a key
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .await
            .entries
            .get(key)
            .map(|entry| entry.value.clone())
    }

    /// All keys, ordered
    pub async fn keys(&self) -> Vec<String> {
        self.state.lock().await.entries.keys().cloned().collect()
    }

    /// Lease a key is bound to, if any
    pub async fn lease_of(&self, key: &str) -> Option<i64> {
        self.state
            .lock()
            .await
            .entries
            .get(key)
            .and_then(|entry| entry.lease)
    }

    /// Ids of leases that are neither revoked nor expired
    pub async fn active_leases(&self) -> Vec<i64> {
        let state = self.state.lock().await;
        let mut ids: Vec<i64> = state.leases.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// TTL a live lease was granted with
    pub async fn lease_ttl(&self, lease_id: i64) -> Option<i64> {
        self.state
            .lock()
            .await
            .leases
            .get(&lease_id)
            .map(|lease| lease.ttl)
    }

    /// Number of open keepalive streams on a lease
    pub async fn keep_alive_streams(&self, lease_id: i64) -> usize {
        let mut state = self.state.lock().await;
        match state.leases.get_mut(&lease_id) {
            Some(lease) => {
                lease.keepers.retain(|tx| !tx.is_closed());
                lease.keepers.len()
            }
            None => 0,
        }
    }

    /// Simulate a missed TTL: the lease and its keys vanish and keepalive
    /// streams close
    pub async fn expire(&self, lease_id: i64) -> bool {
        let expired = self.state.lock().await.drop_lease(lease_id);
        if expired {
            debug!("Expired in-memory lease {}", lease_id);
        }
        expired
    }

    /// Emit one keepalive acknowledgement on every stream of a lease
    pub async fn tick(&self, lease_id: i64) -> usize {
        let mut state = self.state.lock().await;
        let Some(lease) = state.leases.get_mut(&lease_id) else {
            return 0;
        };
        let ack = KeepAliveAck {
            lease_id,
            ttl: lease.ttl,
        };
        lease
            .keepers
            .retain(|tx| !matches!(tx.try_send(ack), Err(TrySendError::Closed(_))));
        lease.keepers.len()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn grant(&self, ttl: i64) -> ResolverResult<Lease> {
        let mut state = self.state.lock().await;
        state.check(Operation::Grant)?;
        if ttl <= 0 {
            return Err(ResolverError::LeaseError(format!(
                "lease TTL must be positive, got {}",
                ttl
            )));
        }

        state.next_lease += 1;
        let id = state.next_lease;
        state.leases.insert(
            id,
            LeaseState {
                ttl,
                keys: BTreeSet::new(),
                keepers: Vec::new(),
            },
        );
        Ok(Lease::new(id, ttl))
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<&Lease>) -> ResolverResult<()> {
        let mut state = self.state.lock().await;
        state.check(Operation::Put)?;

        let lease_id = lease.map(|lease| lease.id());
        if let Some(id) = lease_id {
            let lease = state.leases.get_mut(&id).ok_or_else(|| {
                ResolverError::LeaseError(format!("requested lease {} not found", id))
            })?;
            lease.keys.insert(key.to_string());
        }

        let previous = state.entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                lease: lease_id,
            },
        );
        if let Some(old) = previous.and_then(|entry| entry.lease) {
            if Some(old) != lease_id {
                if let Some(old_lease) = state.leases.get_mut(&old) {
                    old_lease.keys.remove(key);
                }
            }
        }

        state.revision += 1;
        state.notify(WatchEvent::Put {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> ResolverResult<()> {
        let mut state = self.state.lock().await;
        state.check(Operation::Delete)?;
        state.remove_key(key);
        Ok(())
    }

    async fn keep_alive(&self, lease: &Lease) -> ResolverResult<KeepAliveStream> {
        let mut state = self.state.lock().await;
        state.check(Operation::KeepAlive)?;

        let entry = state.leases.get_mut(&lease.id()).ok_or_else(|| {
            ResolverError::LeaseError(format!("requested lease {} not found", lease.id()))
        })?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        // The first renewal happens as soon as the stream opens.
        let _ = tx.try_send(KeepAliveAck {
            lease_id: lease.id(),
            ttl: entry.ttl,
        });
        entry.keepers.push(tx);
        Ok(rx)
    }

    async fn revoke(&self, lease: &Lease) -> ResolverResult<()> {
        let mut state = self.state.lock().await;
        state.check(Operation::Revoke)?;
        if !state.drop_lease(lease.id()) {
            return Err(ResolverError::LeaseError(format!(
                "requested lease {} not found",
                lease.id()
            )));
        }
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> ResolverResult<Snapshot> {
        let state = self.state.lock().await;
        state.check(Operation::Get)?;
        let entries = state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect();
        Ok(Snapshot {
            entries,
            revision: state.revision,
        })
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision: Option<i64>,
    ) -> ResolverResult<WatchStream> {
        let mut state = self.state.lock().await;
        state.check(Operation::Watch)?;

        // Replay and registration share the lock so no event falls between them.
        let backlog = match start_revision {
            Some(start) => state.replay(prefix, start)?,
            None => Vec::new(),
        };
        let (tx, rx) = mpsc::channel(STREAM_BUFFER.max(backlog.len()));
        for event in backlog {
            let _ = tx.try_send(event);
        }
        state.watchers.push((prefix.to_string(), tx));
        Ok(rx)
    }
}
