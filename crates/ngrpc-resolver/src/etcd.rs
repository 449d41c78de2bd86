//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! etcd implementation of the coordination store

use crate::error::{ResolverError, ResolverResult};
use crate::store::{
    CoordinationStore, KeepAliveAck, KeepAliveStream, Lease, Snapshot, WatchEvent, WatchStream,
};
use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, EventType, GetOptions, PutOptions, WatchOptions};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const STREAM_BUFFER: usize = 64;

/// Connection settings for the etcd client
#[derive(Debug, Clone)]
pub struct EtcdOptions {
    /// Timeout for establishing the connection
    pub connect_timeout: Duration,

    /// Per-request timeout
    pub request_timeout: Duration,

    /// HTTP/2 keepalive interval and timeout
    pub keep_alive: (Duration, Duration),

    /// Optional username/password authentication
    pub user: Option<(String, String)>,
}

impl Default for EtcdOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            keep_alive: (Duration::from_secs(30), Duration::from_secs(10)),
            user: None,
        }
    }
}

impl EtcdOptions {
    fn to_connect_options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::new()
            .with_connect_timeout(self.connect_timeout)
            .with_timeout(self.request_timeout)
            .with_keep_alive(self.keep_alive.0, self.keep_alive.1);
        if let Some((name, password)) = &self.user {
            options = options.with_user(name.clone(), password.clone());
        }
        options
    }
}

/// Coordination store backed by an etcd cluster
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connect to an etcd cluster
    pub async fn connect(endpoints: &[String], options: &EtcdOptions) -> ResolverResult<Self> {
        let client = Client::connect(endpoints, Some(options.to_connect_options()))
            .await
            .map_err(|e| {
                ResolverError::ConnectionError(format!("Failed to connect to etcd: {}", e))
            })?;

        info!("Connected to etcd at {}", endpoints.join(","));
        Ok(Self { client })
    }

    /// Wrap an already connected client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Underlying etcd client
    pub fn client(&self) -> Client {
        self.client.clone()
    }
}

/// How often a lease with the given TTL is renewed
pub(crate) fn keep_alive_period(ttl: i64) -> Duration {
    Duration::from_secs((ttl / 3).max(1) as u64)
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn grant(&self, ttl: i64) -> ResolverResult<Lease> {
        let mut client = self.client.clone();
        let response = client.lease_grant(ttl, None).await.map_err(|e| {
            ResolverError::LeaseError(format!("Failed to create etcd lease: {}", e))
        })?;

        debug!("Granted etcd lease {} (ttl {}s)", response.id(), response.ttl());
        Ok(Lease::new(response.id(), response.ttl()))
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<&Lease>) -> ResolverResult<()> {
        let mut client = self.client.clone();
        let options = lease.map(|lease| PutOptions::new().with_lease(lease.id()));
        client.put(key, value, options).await.map_err(|e| {
            ResolverError::StoreError(format!("Failed to put key {} in etcd: {}", key, e))
        })?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> ResolverResult<()> {
        let mut client = self.client.clone();
        client.delete(key, None).await.map_err(|e| {
            ResolverError::StoreError(format!("Failed to delete key {} from etcd: {}", key, e))
        })?;
        Ok(())
    }

    async fn keep_alive(&self, lease: &Lease) -> ResolverResult<KeepAliveStream> {
        let mut client = self.client.clone();
        let (mut keeper, mut stream) = client.lease_keep_alive(lease.id()).await.map_err(|e| {
            ResolverError::LeaseError(format!("Failed to keep etcd lease alive: {}", e))
        })?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let lease_id = lease.id();
        let mut ticker = tokio::time::interval(keep_alive_period(lease.ttl()));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(e) = keeper.keep_alive().await {
                    warn!("Failed to send keepalive for lease {}: {}", lease_id, e);
                    break;
                }

                match stream.message().await {
                    Ok(Some(response)) => {
                        if response.ttl() <= 0 {
                            warn!("Lease {} is no longer known to etcd", lease_id);
                            break;
                        }
                        let ack = KeepAliveAck {
                            lease_id: response.id(),
                            ttl: response.ttl(),
                        };
                        if tx.send(ack).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("Keepalive stream for lease {} ended", lease_id);
                        break;
                    }
                    Err(e) => {
                        warn!("Keepalive stream for lease {} failed: {}", lease_id, e);
                        break;
                    }
                }
            }
            debug!("Keepalive pump for lease {} stopped", lease_id);
        });

        Ok(rx)
    }

    async fn revoke(&self, lease: &Lease) -> ResolverResult<()> {
        let mut client = self.client.clone();
        client.lease_revoke(lease.id()).await.map_err(|e| {
            ResolverError::LeaseError(format!("Failed to revoke etcd lease {}: {}", lease.id(), e))
        })?;
        debug!("Revoked etcd lease {}", lease.id());
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> ResolverResult<Snapshot> {
        let mut client = self.client.clone();
        let response = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| {
                ResolverError::DiscoveryError(format!(
                    "Failed to read prefix {} from etcd: {}",
                    prefix, e
                ))
            })?;

        let entries = response
            .kvs()
            .iter()
            .map(|kv| {
                (
                    String::from_utf8_lossy(kv.key()).into_owned(),
                    kv.value().to_vec(),
                )
            })
            .collect();
        let revision = response.header().map(|h| h.revision()).unwrap_or_default();

        Ok(Snapshot { entries, revision })
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision: Option<i64>,
    ) -> ResolverResult<WatchStream> {
        let mut client = self.client.clone();
        let mut options = WatchOptions::new().with_prefix();
        if let Some(revision) = start_revision {
            options = options.with_start_revision(revision);
        }

        let (mut watcher, mut stream) =
            client.watch(prefix, Some(options)).await.map_err(|e| {
                ResolverError::DiscoveryError(format!("Failed to watch prefix {}: {}", prefix, e))
            })?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let prefix = prefix.to_string();

        tokio::spawn(async move {
            'pump: loop {
                let message = tokio::select! {
                    _ = tx.closed() => break,
                    message = stream.message() => message,
                };

                let response = match message {
                    Ok(Some(response)) => response,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Watch on {} failed: {}", prefix, e);
                        break;
                    }
                };

                for event in response.events() {
                    let Some(kv) = event.kv() else { continue };
                    let key = String::from_utf8_lossy(kv.key()).into_owned();
                    let change = match event.event_type() {
                        EventType::Put => WatchEvent::Put {
                            key,
                            value: kv.value().to_vec(),
                        },
                        EventType::Delete => WatchEvent::Delete { key },
                    };
                    if tx.send(change).await.is_err() {
                        break 'pump;
                    }
                }

                if response.canceled() {
                    warn!("Watch on {} was cancelled by etcd", prefix);
                    break;
                }
            }

            if let Err(e) = watcher.cancel().await {
                debug!("Failed to cancel watch on {}: {}", prefix, e);
            }
            debug!("Watch pump for {} stopped", prefix);
        });

        Ok(rx)
    }
}
