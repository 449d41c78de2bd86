//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! Service registration and discovery for ngrpc
//!
//! Servers publish `{domain}/{name}/{address}` under a lease and keep it
//! alive with a background task ([`EtcdRegistry`]). Clients resolve
//! `etcd:///{domain}/{name}` targets into a load-balanced channel that tracks
//! those keys ([`EtcdDiscovery`], [`ResolverBuilder`]). Everything talks to
//! the store through [`CoordinationStore`], implemented for etcd and for an
//! in-process [`MemoryStore`].

pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod etcd;
pub mod memory;
pub mod registry;
pub mod store;

pub use discovery::{
    parse_target, Discovery, EndpointChange, EtcdDiscovery, ResolverBuilder, ResolverHandle,
    SCHEME,
};
pub use endpoint::{join_key, EndpointRecord};
pub use error::{ResolverError, ResolverResult};
pub use etcd::{EtcdOptions, EtcdStore};
pub use memory::{MemoryStore, Operation};
pub use registry::{EtcdRegistry, Registry, ServiceInfo, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_TAG};
pub use store::{CoordinationStore, KeepAliveAck, Lease, Snapshot, WatchEvent};
