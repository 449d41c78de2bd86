//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! Lease-based service registration
//!
//! A registration binds `{domain}/{name}/{address}` to a lease whose TTL is
//! the heartbeat interval. A background task drains the keepalive stream for
//! as long as the binding lives. If the store becomes unreachable the lease
//! simply expires and the address drops out of discovery.

use crate::endpoint::{join_key, EndpointRecord};
use crate::error::{ResolverError, ResolverResult};
use crate::etcd::{EtcdOptions, EtcdStore};
use crate::store::{CoordinationStore, KeepAliveStream, Lease};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Default heartbeat interval, which is also the lease TTL
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default tag attached to registered services
pub const DEFAULT_TAG: &str = "grpc";

/// Identifies one service instance for registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Logical service name
    pub name: String,

    /// Reachable address (`host:port`)
    pub address: String,

    /// Free-form tags, published comma-joined
    pub tags: Vec<String>,

    /// Heartbeat interval; the lease TTL in whole seconds
    pub interval: Duration,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            tags: vec![DEFAULT_TAG.to_string()],
            interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Lease TTL in seconds, never below one
    pub fn ttl_secs(&self) -> i64 {
        self.interval.as_secs().max(1) as i64
    }

    fn validate(&self) -> ResolverResult<()> {
        if self.name.trim().is_empty() {
            return Err(ResolverError::InvalidServiceInfo(
                "service name must not be empty".to_string(),
            ));
        }
        if self.address.trim().is_empty() {
            return Err(ResolverError::InvalidServiceInfo(
                "service address must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Publishes a service instance to a coordination store
#[async_trait]
pub trait Registry: Send + Sync {
    /// Publish `info` and keep it alive until [`Registry::close`]
    async fn register(&mut self, info: &ServiceInfo) -> ResolverResult<()>;

    /// Withdraw the registration. Calling it without an active registration
    /// is a no-op.
    async fn close(&mut self) -> ResolverResult<()>;
}

struct RegistrationBinding {
    lease: Lease,
    key: String,
    cancel: CancellationToken,
    watcher: JoinHandle<()>,
}

/// [`Registry`] over an etcd-style lease store
pub struct EtcdRegistry {
    store: Arc<dyn CoordinationStore>,
    domain: String,
    binding: Option<RegistrationBinding>,
}

impl EtcdRegistry {
    /// Create a registry publishing under `domain`
    pub fn new(store: Arc<dyn CoordinationStore>, domain: impl Into<String>) -> Self {
        Self {
            store,
            domain: domain.into(),
            binding: None,
        }
    }

    /// Connect to etcd and create a registry publishing under `domain`
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

    /// Lease of the active registration
    pub fn lease(&self) -> Option<Lease> {
        self.binding.as_ref().map(|binding| binding.lease)
    }

    /// Key of the active registration
    pub fn key(&self) -> Option<&str> {
        self.binding.as_ref().map(|binding| binding.key.as_str())
    }

    /// Whether the keepalive watch of the active registration is still running
    pub fn is_watching(&self) -> bool {
        self.binding
            .as_ref()
            .map(|binding| !binding.watcher.is_finished())
            .unwrap_or(false)
    }

    async fn bind(
        &self,
        key: &str,
        info: &ServiceInfo,
        lease: &Lease,
    ) -> ResolverResult<KeepAliveStream> {
        let record = EndpointRecord::for_service(info);
        self.store
            .put(key, record.to_bytes()?, Some(lease))
            .await
            .map_err(|e| {
                ResolverError::RegistrationError(format!("Failed to bind {}: {}", key, e))
            })?;

        self.store.keep_alive(lease).await.map_err(|e| {
            ResolverError::RegistrationError(format!(
                "Failed to start keepalive for lease {}: {}",
                lease.id(),
                e
            ))
        })
    }
}

async fn watch_keep_alive(lease_id: i64, mut acks: KeepAliveStream, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Keepalive watch for lease {} cancelled", lease_id);
                return;
            }
            ack = acks.recv() => match ack {
                Some(ack) => trace!(lease_id, ttl = ack.ttl, "Lease renewed"),
                None => {
                    warn!("Keepalive stream for lease {} closed", lease_id);
                    return;
                }
            },
        }
    }
}

#[async_trait]
impl Registry for EtcdRegistry {
    async fn register(&mut self, info: &ServiceInfo) -> ResolverResult<()> {
        if let Some(binding) = &self.binding {
            return Err(ResolverError::AlreadyRegistered(binding.key.clone()));
        }
        info.validate()?;

        let lease = self.store.grant(info.ttl_secs()).await.map_err(|e| {
            ResolverError::RegistrationError(format!("Failed to grant lease: {}", e))
        })?;
        let key = join_key(&[&self.domain, &info.name, &info.address]);

        let acks = match self.bind(&key, info, &lease).await {
            Ok(acks) => acks,
            Err(e) => {
                if let Err(revoke_err) = self.store.revoke(&lease).await {
                    warn!(
                        "Failed to revoke lease {} after registration error: {}",
                        lease.id(),
                        revoke_err
                    );
                }
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch_keep_alive(lease.id(), acks, cancel.clone()));
        self.binding = Some(RegistrationBinding {
            lease,
            key: key.clone(),
            cancel,
            watcher,
        });

        info!(
            "Service registered: {} (lease: {}, ttl: {}s)",
            key,
            lease.id(),
            lease.ttl()
        );
        Ok(())
    }

    async fn close(&mut self) -> ResolverResult<()> {
        let Some(binding) = self.binding.take() else {
            debug!("No active registration to close");
            return Ok(());
        };

        binding.cancel.cancel();
        if let Err(e) = binding.watcher.await {
            warn!("Keepalive watch for {} ended abnormally: {}", binding.key, e);
        }

        self.store.revoke(&binding.lease).await.map_err(|e| {
            ResolverError::DeregistrationError(format!(
                "Failed to revoke lease {} for {}: {}",
                binding.lease.id(),
                binding.key,
                e
            ))
        })?;

        info!("Service deregistered: {}", binding.key);
        Ok(())
    }
}

impl Drop for EtcdRegistry {
    fn drop(&mut self) {
        // The lease is left to expire on its TTL.
        if let Some(binding) = &self.binding {
            binding.cancel.cancel();
        }
    }
}
