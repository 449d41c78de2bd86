//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! gRPC client construction
//!
//! A [`Client`] owns a `tonic` channel wrapped in the client trace layer and
//! an [`InterceptorChain`] that stamps credentials and runs caller
//! interceptors. Generated stubs take the channel from [`Client::conn`].

use crate::auth::CustomCredential;
use crate::error::{NgrpcError, NgrpcResult};
use crate::interceptor::InterceptorChain;
use crate::options::{ClientOptions, KeepaliveOptions};
use crate::retry::RetryPolicy;
use crate::telemetry::{ClientTraceLayer, ClientTraceService};
use crate::tls;
use ngrpc_resolver::{Discovery, ResolverError, ResolverHandle};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::Status;
use tower::Layer;
use tracing::{debug, info, warn};

/// Channel handed to generated client stubs
pub type ClientChannel = InterceptedService<ClientTraceService<Channel>, InterceptorChain>;

/// Turn an address into a URI, adding a scheme when missing. A bare
/// `:port` means the local host.
pub(crate) fn endpoint_uri(address: &str, tls: bool) -> String {
    let address = address.trim();
    if address.contains("://") {
        return address.to_string();
    }
    let scheme = if tls { "https" } else { "http" };
    if address.starts_with(':') {
        format!("{}://127.0.0.1{}", scheme, address)
    } else {
        format!("{}://{}", scheme, address)
    }
}

#[derive(Clone)]
struct EndpointSettings {
    tls: Option<ClientTlsConfig>,
    keepalive: KeepaliveOptions,
    connect_timeout: Duration,
}

impl EndpointSettings {
    fn endpoint(&self, address: &str) -> NgrpcResult<Endpoint> {
        let uri = endpoint_uri(address, self.tls.is_some());
        let mut endpoint = Endpoint::from_shared(uri.clone()).map_err(|e| {
            NgrpcError::Configuration(format!("Invalid server address {}: {}", uri, e))
        })?;

        endpoint = endpoint
            .connect_timeout(self.connect_timeout)
            .tcp_keepalive(self.keepalive.tcp);
        if let Some(interval) = self.keepalive.interval {
            endpoint = endpoint
                .http2_keep_alive_interval(interval)
                .keep_alive_while_idle(true);
        }
        if let Some(timeout) = self.keepalive.timeout {
            endpoint = endpoint.keep_alive_timeout(timeout);
        }
        if let Some(tls) = &self.tls {
            endpoint = endpoint.tls_config(tls.clone())?;
        }
        Ok(endpoint)
    }
}

/// gRPC client
pub struct Client {
    channel: ClientChannel,
    target: String,
    tls: bool,
    retry: RetryPolicy,
    resolver: Option<ResolverHandle>,
    discovery: Option<Box<dyn Discovery>>,
}

impl Client {
    /// Plaintext client
    pub async fn new(address: impl Into<String>, interceptors: InterceptorChain) -> NgrpcResult<Self> {
        Self::connect(
            ClientOptions::new()
                .with_address(address)
                .with_interceptors(interceptors),
        )
        .await
    }

    /// TLS client trusting the CA in `ca_file`
    pub async fn new_tls_from_file(
        address: impl Into<String>,
        ca_file: impl AsRef<Path>,
        domain_name: Option<&str>,
        interceptors: InterceptorChain,
    ) -> NgrpcResult<Self> {
        let tls = tls::client_tls_from_file(ca_file, domain_name).await?;
        Self::new_tls(address, tls, interceptors).await
    }

    /// TLS client
    pub async fn new_tls(
        address: impl Into<String>,
        tls: ClientTlsConfig,
        interceptors: InterceptorChain,
    ) -> NgrpcResult<Self> {
        Self::connect(
            ClientOptions::new()
                .with_address(address)
                .with_tls(tls)
                .with_interceptors(interceptors),
        )
        .await
    }

    /// Plaintext client sending a key/secret credential
    pub async fn new_custom_authentication(
        address: impl Into<String>,
        credential: CustomCredential,
        interceptors: InterceptorChain,
    ) -> NgrpcResult<Self> {
        Self::connect(
            ClientOptions::new()
                .with_address(address)
                .with_credential(credential)
                .with_interceptors(interceptors),
        )
        .await
    }

    /// TLS client sending a key/secret credential
    pub async fn new_tls_custom_authentication(
        address: impl Into<String>,
        tls: ClientTlsConfig,
        credential: CustomCredential,
        interceptors: InterceptorChain,
    ) -> NgrpcResult<Self> {
        Self::connect(
            ClientOptions::new()
                .with_address(address)
                .with_tls(tls)
                .with_credential(credential)
                .with_interceptors(interceptors),
        )
        .await
    }

    /// Build a client from options.
    ///
    /// With discovery the channel balances over every registered address of
    /// the service and follows changes. Otherwise it targets `address`,
    /// connecting immediately when `block` is set.
    pub async fn connect(options: ClientOptions) -> NgrpcResult<Self> {
        let ClientOptions {
            name,
            address,
            tls,
            credential,
            interceptors,
            keepalive,
            connect_timeout,
            block,
            mut discovery,
            service,
            retry,
            tracing,
        } = options;

        let mut chain = InterceptorChain::new();
        if let Some(credential) = &credential {
            if credential.require_transport_security() && tls.is_none() {
                return Err(NgrpcError::InsecureCredential);
            }
            chain.push(credential.interceptor()?);
        }
        chain.extend(&interceptors);

        let is_tls = tls.is_some();
        let settings = EndpointSettings {
            tls,
            keepalive,
            connect_timeout,
        };

        let (channel, target, resolver) = match discovery.as_mut() {
            Some(discovery) => {
                let service = service.unwrap_or_else(|| name.clone());
                let builder = discovery.discover(&service).await?;
                let target = discovery.address();
                if block {
                    debug!("Ignoring block for discovered target {}", target);
                }
                let factory_settings = settings.clone();
                let (channel, handle) = builder
                    .build(&target, move |addr| {
                        factory_settings
                            .endpoint(addr)
                            .map_err(|e| ResolverError::DiscoveryError(e.to_string()))
                    })
                    .await?;
                (channel, target, Some(handle))
            }
            None => {
                let endpoint = settings.endpoint(&address)?;
                let channel = if block {
                    endpoint.connect().await?
                } else {
                    endpoint.connect_lazy()
                };
                (channel, address, None)
            }
        };

        info!(
            "Client {} targeting {} (tls: {}, tracing: {})",
            name, target, is_tls, tracing
        );

        let traced = ClientTraceLayer::new(tracing).layer(channel);
        Ok(Self {
            channel: InterceptedService::new(traced, chain),
            target,
            tls: is_tls,
            retry,
            resolver,
            discovery,
        })
    }

    /// Channel for generated stubs
    pub fn conn(&self) -> ClientChannel {
        self.channel.clone()
    }

    /// Address or discovery target this client was built for
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run a call under the client's retry policy
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, Status>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        self.retry.run(operation).await
    }

    /// Stop following discovery changes and release the discovery instance
    pub async fn close(mut self) -> NgrpcResult<()> {
        if let Some(resolver) = self.resolver.take() {
            resolver.close().await;
        }
        if let Some(mut discovery) = self.discovery.take() {
            if let Err(e) = discovery.close() {
                warn!("Failed to close discovery: {}", e);
                return Err(e.into());
            }
        }
        debug!("Client for {} closed", self.target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ngrpc_resolver::{EtcdDiscovery, MemoryStore};
    use std::sync::Arc;

    #[test]
    fn test_endpoint_uri() {
        assert_eq!(endpoint_uri("10.0.0.5:5000", false), "http://10.0.0.5:5000");
        assert_eq!(endpoint_uri("10.0.0.5:5000", true), "https://10.0.0.5:5000");
        assert_eq!(endpoint_uri(":5000", false), "http://127.0.0.1:5000");
        assert_eq!(endpoint_uri("http://a:1", true), "http://a:1");
    }

    #[tokio::test]
    async fn test_lazy_client_does_not_connect() {
        let client = Client::new("127.0.0.1:1", InterceptorChain::new()).await.unwrap();
        assert!(!client.is_tls());
        assert_eq!(client.target(), "127.0.0.1:1");
        assert_eq!(client.retry_policy().max_attempts, 3);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_secure_credential_needs_tls() {
        let credential = CustomCredential::new("k", "s", true);
        let result =
            Client::new_custom_authentication("127.0.0.1:1", credential, InterceptorChain::new())
                .await;
        assert!(matches!(result, Err(NgrpcError::InsecureCredential)));
    }

    #[tokio::test]
    async fn test_plaintext_credential_is_allowed() {
        let credential = CustomCredential::new("k", "s", false);
        let client =
            Client::new_custom_authentication("127.0.0.1:1", credential, InterceptorChain::new())
                .await
                .unwrap();
        assert!(!client.is_tls());
    }

    #[tokio::test]
    async fn test_blocking_connect_to_closed_port_fails() {
        let options = ClientOptions::new()
            .with_address("127.0.0.1:1")
            .with_block(true)
            .with_connect_timeout(Duration::from_millis(500));
        let result = Client::connect(options).await;
        assert!(matches!(result, Err(NgrpcError::Transport(_))));
    }

    #[tokio::test]
    async fn test_invalid_address_is_configuration_error() {
        let result = Client::new("not a uri", InterceptorChain::new()).await;
        assert!(matches!(result, Err(NgrpcError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_discovery_client_targets_resolver_address() {
        let store = Arc::new(MemoryStore::new());
        let options = ClientOptions::new()
            .with_service("orders")
            .with_discovery(EtcdDiscovery::new(store, "svc"));

        let client = Client::connect(options).await.unwrap();
        assert_eq!(client.target(), "etcd:///svc/orders");
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_call_retries_transient_status() {
        let client = Client::new("127.0.0.1:1", InterceptorChain::new()).await.unwrap();
        let mut attempts = 0;
        let result = client
            .call(|| {
                attempts += 1;
                let attempt = attempts;
                async move {
                    if attempt < 2 {
                        Err(Status::unavailable("warming up"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
    }
}
