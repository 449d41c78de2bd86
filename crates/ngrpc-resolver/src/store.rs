//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! Coordination store abstraction
//!
//! Registration and discovery only need a narrow slice of a distributed
//! key-value store: leases, lease-bound puts, keepalive acknowledgements and
//! prefix reads/watches. [`CoordinationStore`] captures that slice so the
//! etcd client can be swapped for [`crate::memory::MemoryStore`] in tests.

use crate::error::ResolverResult;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Stream of keepalive acknowledgements. Yields `None` once the lease can no
/// longer be renewed.
pub type KeepAliveStream = mpsc::Receiver<KeepAliveAck>;

/// Stream of key changes under a watched prefix.
pub type WatchStream = mpsc::Receiver<WatchEvent>;

/// A lease granted by the coordination store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lease {
    id: i64,
    ttl: i64,
}

impl Lease {
    /// Create a lease handle from a granted id and TTL (seconds)
    pub fn new(id: i64, ttl: i64) -> Self {
        Self { id, ttl }
    }

    /// Lease identifier
    pub fn id(&self) -> i64 {
        self.id
    }

    /// TTL in seconds as granted by the store
    pub fn ttl(&self) -> i64 {
        self.ttl
    }
}

/// A single keepalive acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveAck {
    /// Lease that was renewed
    pub lease_id: i64,

    /// Remaining TTL after renewal
    pub ttl: i64,
}

/// A change observed under a watched prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl WatchEvent {
    pub fn key(&self) -> &str {
        match self {
            WatchEvent::Put { key, .. } | WatchEvent::Delete { key } => key,
        }
    }
}

/// Point-in-time read of a prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Key/value pairs under the prefix, ordered by key
    pub entries: Vec<(String, Vec<u8>)>,

    /// Store revision the read was served at
    pub revision: i64,
}

/// Operations the registry and resolver need from the coordination store
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Grant a lease with the given TTL in seconds
    async fn grant(&self, ttl: i64) -> ResolverResult<Lease>;

    /// Write a key, optionally bound to a lease
    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<&Lease>) -> ResolverResult<()>;

    /// Delete a key
    async fn delete(&self, key: &str) -> ResolverResult<()>;

    /// Open a keepalive stream that keeps renewing the lease until the
    /// returned receiver is dropped
    async fn keep_alive(&self, lease: &Lease) -> ResolverResult<KeepAliveStream>;

    /// Revoke a lease, deleting every key bound to it
    async fn revoke(&self, lease: &Lease) -> ResolverResult<()>;

    /// Read every key under a prefix
    async fn get_prefix(&self, prefix: &str) -> ResolverResult<Snapshot>;

    /// Watch a prefix, starting at `start_revision` when given
    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision: Option<i64>,
    ) -> ResolverResult<WatchStream>;
}
