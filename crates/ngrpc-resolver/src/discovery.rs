//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! Service discovery over the coordination store
//!
//! [`Discovery::discover`] binds a logical service name and hands back a
//! [`ResolverBuilder`]. The builder turns a `etcd:///{domain}/{service}`
//! target into a stream of endpoint changes, or directly into a load-balanced
//! `tonic` channel that follows registrations as they come and go.

use crate::endpoint::{join_key, EndpointRecord};
use crate::error::{ResolverError, ResolverResult};
use crate::etcd::{EtcdOptions, EtcdStore};
use crate::store::{CoordinationStore, WatchEvent, WatchStream};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tower::discover::Change;
use tracing::{debug, info, warn};

/// URI scheme understood by [`ResolverBuilder`]
pub const SCHEME: &str = "etcd";

const CHANGE_BUFFER: usize = 64;

/// Resolves a logical service name into a resolver builder
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Bind this instance to `service` and return a builder for it
    async fn discover(&mut self, service: &str) -> ResolverResult<ResolverBuilder>;

    /// Virtual target for the bound service, `{scheme}:///{domain}/{service}`
    fn address(&self) -> String;

    /// Release resources held by this instance
    fn close(&mut self) -> ResolverResult<()>;
}

/// [`Discovery`] over an etcd-style store
pub struct EtcdDiscovery {
    store: Arc<dyn CoordinationStore>,
    domain: String,
    service: String,
}

impl EtcdDiscovery {
    pub fn new(store: Arc<dyn CoordinationStore>, domain: impl Into<String>) -> Self {
        Self {
            store,
            domain: domain.into(),
            service: String::new(),
        }
    }

    /// Connect to etcd and create a discovery instance for `domain`
    pub async fn connect(
        endpoints: &[String],
        options: &EtcdOptions,
        domain: impl Into<String>,
    ) -> ResolverResult<Self> {
        let store = EtcdStore::connect(endpoints, options).await?;
        Ok(Self::new(Arc::new(store), domain))
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Service bound by the last [`Discovery::discover`] call
    pub fn service(&self) -> &str {
        &self.service
    }
}

#[async_trait]
impl Discovery for EtcdDiscovery {
    async fn discover(&mut self, service: &str) -> ResolverResult<ResolverBuilder> {
        if service.trim().is_empty() {
            return Err(ResolverError::DiscoveryError(
                "service name must not be empty".to_string(),
            ));
        }
        self.service = service.to_string();
        debug!("Discovery bound to service {}", service);
        Ok(ResolverBuilder::new(self.store.clone()))
    }

    fn address(&self) -> String {
        format!("{}:///{}", SCHEME, join_key(&[&self.domain, &self.service]))
    }

    fn close(&mut self) -> ResolverResult<()> {
        Ok(())
    }
}

/// A change in the set of endpoints behind a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointChange {
    /// An endpoint appeared or changed address. `key` is the store key.
    Insert { key: String, addr: String },

    /// The endpoint registered under `key` went away
    Remove { key: String },
}

/// Stops a resolver's watch task when closed or dropped
pub struct ResolverHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ResolverHandle {
    /// Whether the watch task is still running
    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Stop the watch task and wait for it to finish
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Resolver watch task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ResolverHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Extract the `{domain}/{service}` path from `etcd:///{domain}/{service}`
pub fn parse_target(target: &str) -> ResolverResult<String> {
    let rest = target
        .strip_prefix(SCHEME)
        .and_then(|rest| rest.strip_prefix("://"))
        .ok_or_else(|| {
            ResolverError::InvalidTarget(format!("{} does not use the {} scheme", target, SCHEME))
        })?;

    // Skip the authority and the single slash after it. Anything left,
    // including a leading slash from the domain, is part of the key.
    let path = match rest.find('/') {
        Some(index) => &rest[index + 1..],
        None => "",
    };
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        return Err(ResolverError::InvalidTarget(format!(
            "{} does not name a service",
            target
        )));
    }
    Ok(path.to_string())
}

/// Builds resolvers for `etcd://` targets
#[derive(Clone)]
pub struct ResolverBuilder {
    store: Arc<dyn CoordinationStore>,
}

impl ResolverBuilder {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    pub fn scheme(&self) -> &'static str {
        SCHEME
    }

    /// Follow the endpoints behind `target`.
    ///
    /// Current registrations are emitted first as inserts, followed by live
    /// changes. The receiver closes when the handle is closed or the store
    /// watch ends.
    pub async fn watch(
        &self,
        target: &str,
    ) -> ResolverResult<(mpsc::Receiver<EndpointChange>, ResolverHandle)> {
        let path = parse_target(target)?;
        let prefix = format!("{}/", join_key(&[&path]));

        let snapshot = self.store.get_prefix(&prefix).await?;
        let events = self
            .store
            .watch_prefix(&prefix, Some(snapshot.revision + 1))
            .await?;

        let (tx, rx) = mpsc::channel(CHANGE_BUFFER);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_watch(
            prefix.clone(),
            snapshot.entries,
            events,
            tx,
            cancel.clone(),
        ));

        info!("Resolving endpoints under {}", prefix);
        Ok((
            rx,
            ResolverHandle {
                cancel,
                task: Some(task),
            },
        ))
    }

    /// Build a load-balanced channel over the endpoints behind `target`.
    ///
    /// `factory` turns each address into a `tonic` endpoint; addresses it
    /// rejects are skipped.
    pub async fn build<F>(
        &self,
        target: &str,
        factory: F,
    ) -> ResolverResult<(Channel, ResolverHandle)>
    where
        F: Fn(&str) -> ResolverResult<Endpoint> + Send + 'static,
    {
        let (mut changes, handle) = self.watch(target).await?;
        let (channel, sender) = Channel::balance_channel::<String>(CHANGE_BUFFER);

        tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                let change = match change {
                    EndpointChange::Insert { key, addr } => match factory(&addr) {
                        Ok(endpoint) => Change::Insert(key, endpoint),
                        Err(e) => {
                            warn!("Skipping endpoint {}: {}", addr, e);
                            continue;
                        }
                    },
                    EndpointChange::Remove { key } => Change::Remove(key),
                };
                if sender.send(change).await.is_err() {
                    debug!("Balance channel dropped, stopping forwarder");
                    break;
                }
            }
        });

        Ok((channel, handle))
    }
}

fn decode(key: &str, value: &[u8]) -> Option<String> {
    match EndpointRecord::from_bytes(value) {
        Ok(record) => Some(record.addr),
        Err(e) => {
            warn!("Ignoring malformed endpoint record under {}: {}", key, e);
            None
        }
    }
}

async fn run_watch(
    prefix: String,
    initial: Vec<(String, Vec<u8>)>,
    mut events: WatchStream,
    tx: mpsc::Sender<EndpointChange>,
    cancel: CancellationToken,
) {
    let mut known: HashMap<String, String> = HashMap::new();

    for (key, value) in initial {
        let Some(addr) = decode(&key, &value) else {
            continue;
        };
        known.insert(key.clone(), addr.clone());
        if tx.send(EndpointChange::Insert { key, addr }).await.is_err() {
            return;
        }
    }

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    warn!("Watch on {} ended", prefix);
                    break;
                }
            },
        };

        let change = match event {
            WatchEvent::Put { key, value } => {
                let Some(addr) = decode(&key, &value) else {
                    continue;
                };
                if known.get(&key) == Some(&addr) {
                    continue;
                }
                known.insert(key.clone(), addr.clone());
                EndpointChange::Insert { key, addr }
            }
            WatchEvent::Delete { key } => {
                if known.remove(&key).is_none() {
                    continue;
                }
                EndpointChange::Remove { key }
            }
        };

        if tx.send(change).await.is_err() {
            break;
        }
    }
    debug!("Resolver watch on {} stopped", prefix);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStore, Operation};
    use crate::registry::{EtcdRegistry, Registry, ServiceInfo};
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next(rx: &mut mpsc::Receiver<EndpointChange>) -> EndpointChange {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("change should arrive")
            .expect("stream should be open")
    }

    #[tokio::test]
    async fn test_address_embeds_service_name() {
        let mut discovery = EtcdDiscovery::new(Arc::new(MemoryStore::new()), "svc");
        let builder = discovery.discover("orders").await.unwrap();
        assert_eq!(builder.scheme(), "etcd");
        assert_eq!(discovery.address(), "etcd:///svc/orders");
        assert_eq!(discovery.service(), "orders");

        discovery.discover("billing.v2").await.unwrap();
        assert_eq!(discovery.address(), "etcd:///svc/billing.v2");
        assert!(discovery.close().is_ok());
    }

    #[tokio::test]
    async fn test_discover_rejects_empty_name() {
        let mut discovery = EtcdDiscovery::new(Arc::new(MemoryStore::new()), "svc");
        assert!(discovery.discover("").await.is_err());
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("etcd:///svc/orders").unwrap(), "svc/orders");
        assert_eq!(parse_target("etcd://authority/svc/orders").unwrap(), "svc/orders");
        assert_eq!(parse_target("etcd:////svc/orders").unwrap(), "/svc/orders");
        assert_eq!(parse_target("etcd:///svc/orders/").unwrap(), "svc/orders");
        assert!(matches!(
            parse_target("dns:///svc/orders"),
            Err(ResolverError::InvalidTarget(_))
        ));
        assert!(parse_target("etcd:///").is_err());
        assert!(parse_target("etcd://").is_err());
        assert!(parse_target("etcd:////").is_err());
    }

    #[tokio::test]
    async fn test_rooted_domain_discovers_registration() {
        let shared: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());

        let mut registry = EtcdRegistry::new(shared.clone(), "/svc");
        registry
            .register(&ServiceInfo::new("orders", "10.0.0.5:5000"))
            .await
            .unwrap();

        let mut discovery = EtcdDiscovery::new(shared.clone(), "/svc");
        let builder = discovery.discover("orders").await.unwrap();
        assert_eq!(discovery.address(), "etcd:////svc/orders");

        let (mut changes, handle) = builder.watch(&discovery.address()).await.unwrap();
        assert_eq!(
            next(&mut changes).await,
            EndpointChange::Insert {
                key: "/svc/orders/10.0.0.5:5000".to_string(),
                addr: "10.0.0.5:5000".to_string(),
            }
        );

        registry.close().await.unwrap();
        assert_eq!(
            next(&mut changes).await,
            EndpointChange::Remove {
                key: "/svc/orders/10.0.0.5:5000".to_string(),
            }
        );
        handle.close().await;
    }

    #[tokio::test]
    async fn test_trailing_slash_domain_matches_registry_keys() {
        let shared: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
        let mut discovery = EtcdDiscovery::new(shared, "svc/");
        discovery.discover("orders").await.unwrap();
        assert_eq!(discovery.address(), "etcd:///svc/orders");
    }

    #[tokio::test]
    async fn test_watch_follows_registrations() {
        let store = MemoryStore::new();
        let shared: Arc<dyn CoordinationStore> = Arc::new(store.clone());

        let mut first = EtcdRegistry::new(shared.clone(), "svc");
        first
            .register(&ServiceInfo::new("orders", "10.0.0.5:5000"))
            .await
            .unwrap();

        let mut discovery = EtcdDiscovery::new(shared.clone(), "svc");
        let builder = discovery.discover("orders").await.unwrap();
        let (mut changes, handle) = builder.watch(&discovery.address()).await.unwrap();

        assert_eq!(
            next(&mut changes).await,
            EndpointChange::Insert {
                key: "svc/orders/10.0.0.5:5000".to_string(),
                addr: "10.0.0.5:5000".to_string(),
            }
        );

        let mut second = EtcdRegistry::new(shared.clone(), "svc");
        second
            .register(&ServiceInfo::new("orders", "10.0.0.6:5000"))
            .await
            .unwrap();
        assert_eq!(
            next(&mut changes).await,
            EndpointChange::Insert {
                key: "svc/orders/10.0.0.6:5000".to_string(),
                addr: "10.0.0.6:5000".to_string(),
            }
        );

        first.close().await.unwrap();
        assert_eq!(
            next(&mut changes).await,
            EndpointChange::Remove {
                key: "svc/orders/10.0.0.5:5000".to_string(),
            }
        );

        handle.close().await;
        assert!(changes.recv().await.is_none());
        second.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_watch_ignores_other_services_and_bad_records() {
        let store = MemoryStore::new();
        let builder = ResolverBuilder::new(Arc::new(store.clone()));
        let (mut changes, _handle) = builder.watch("etcd:///svc/orders").await.unwrap();

        store
            .put("svc/ordersx/10.0.0.9:1", br#"{"Addr":"10.0.0.9:1"}"#.to_vec(), None)
            .await
            .unwrap();
        store
            .put("svc/orders/garbage", b"not json".to_vec(), None)
            .await
            .unwrap();
        store
            .put("svc/orders/10.0.0.7:1", br#"{"Addr":"10.0.0.7:1"}"#.to_vec(), None)
            .await
            .unwrap();

        assert_eq!(
            next(&mut changes).await,
            EndpointChange::Insert {
                key: "svc/orders/10.0.0.7:1".to_string(),
                addr: "10.0.0.7:1".to_string(),
            }
        );
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lease_expiry_removes_endpoint() {
        let store = MemoryStore::new();
        let shared: Arc<dyn CoordinationStore> = Arc::new(store.clone());
        let mut registry = EtcdRegistry::new(shared.clone(), "svc");
        registry
            .register(&ServiceInfo::new("orders", "10.0.0.5:5000"))
            .await
            .unwrap();

        let builder = ResolverBuilder::new(shared);
        let (mut changes, _handle) = builder.watch("etcd:///svc/orders").await.unwrap();
        assert!(matches!(next(&mut changes).await, EndpointChange::Insert { .. }));

        let lease = registry.lease().unwrap();
        store.expire(lease.id()).await;
        assert_eq!(
            next(&mut changes).await,
            EndpointChange::Remove {
                key: "svc/orders/10.0.0.5:5000".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_watch_reports_store_failures() {
        let store = MemoryStore::new();
        store.fail(Operation::Watch).await;
        let builder = ResolverBuilder::new(Arc::new(store));
        assert!(builder.watch("etcd:///svc/orders").await.is_err());
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_watch() {
        let store = MemoryStore::new();
        let builder = ResolverBuilder::new(Arc::new(store));
        let (mut changes, handle) = builder.watch("etcd:///svc/orders").await.unwrap();
        assert!(handle.is_running());

        drop(handle);
        let closed = timeout(Duration::from_secs(1), changes.recv())
            .await
            .expect("watch should stop");
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_build_returns_balanced_channel() {
        let store = MemoryStore::new();
        store
            .put("svc/orders/127.0.0.1:1", br#"{"Addr":"127.0.0.1:1"}"#.to_vec(), None)
            .await
            .unwrap();
        let builder = ResolverBuilder::new(Arc::new(store));

        let (_channel, handle) = builder
            .build("etcd:///svc/orders", |addr| {
                Endpoint::from_shared(format!("http://{}", addr))
                    .map_err(|e| ResolverError::DiscoveryError(e.to_string()))
            })
            .await
            .unwrap();
        assert!(handle.is_running());
        handle.close().await;
    }
}
