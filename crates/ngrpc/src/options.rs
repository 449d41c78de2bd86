//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! Server and client options
//!
//! Options start from defaults and are adjusted with `with_*` builder
//! methods, or built from a loaded [`NgrpcConfig`].

use crate::auth::{CredentialValidator, CustomCredential, StaticCredentials};
use crate::config::{ClientConfig, NgrpcConfig, RegistryConfig};
use crate::error::NgrpcResult;
use crate::interceptor::InterceptorChain;
use crate::retry::RetryPolicy;
use crate::tls;
use crate::util::normalize_listen_address;
use ngrpc_resolver::{
    Discovery, EtcdDiscovery, EtcdOptions, EtcdRegistry, Registry, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_TAG,
};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tonic::service::Interceptor;
use tonic::transport::{ClientTlsConfig, ServerTlsConfig};

/// Default listen address
pub const DEFAULT_SERVER_ADDRESS: &str = "0.0.0.0:5000";

/// Default client target
pub const DEFAULT_CLIENT_ADDRESS: &str = "127.0.0.1:5000";

/// Name used when none is configured and the hostname is unavailable
pub const UNKNOWN_NAME: &str = "unknown";

fn default_server_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_NAME.to_string())
}

/// HTTP/2 and TCP keepalive settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepaliveOptions {
    /// HTTP/2 ping interval
    pub interval: Option<Duration>,

    /// How long to wait for a ping acknowledgement
    pub timeout: Option<Duration>,

    /// TCP keepalive
    pub tcp: Option<Duration>,
}

impl KeepaliveOptions {
    fn from_secs(interval: Option<u64>, timeout: Option<u64>, tcp: Option<u64>) -> Self {
        Self {
            interval: interval.map(Duration::from_secs),
            timeout: timeout.map(Duration::from_secs),
            tcp: tcp.map(Duration::from_secs),
        }
    }
}

pub(crate) fn etcd_options(config: &RegistryConfig) -> EtcdOptions {
    EtcdOptions {
        connect_timeout: Duration::from_secs(config.connect_timeout_secs.max(1)),
        user: config.user.clone(),
        ..EtcdOptions::default()
    }
}

/// Server options
pub struct ServerOptions {
    /// Service name used for health status and registration
    pub name: String,

    /// Listen address
    pub address: String,

    /// Bind an OS-assigned port
    pub random_port: bool,

    pub tls: Option<ServerTlsConfig>,

    /// Validates `app_key`/`app_secret` on every call
    pub validator: Option<Arc<dyn CredentialValidator>>,

    /// Interceptors run after credential validation
    pub interceptors: InterceptorChain,

    pub keepalive: KeepaliveOptions,

    /// Registry the server publishes itself to after it starts
    pub registry: Option<Box<dyn Registry>>,

    /// Tags published with the registration
    pub tags: Vec<String>,

    /// Registration heartbeat interval
    pub heartbeat_interval: Duration,

    /// Serve the reflection service
    pub reflection: bool,

    /// Trace incoming calls
    pub tracing: bool,

    /// Encoded file descriptor sets exposed through reflection
    pub descriptor_sets: Vec<&'static [u8]>,

    /// Address to register instead of the derived one
    pub advertise_address: Option<String>,

    /// Interface to take the advertised IPv4 address from
    pub advertise_interface: Option<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            address: DEFAULT_SERVER_ADDRESS.to_string(),
            random_port: false,
            tls: None,
            validator: None,
            interceptors: InterceptorChain::new(),
            keepalive: KeepaliveOptions::default(),
            registry: None,
            tags: vec![DEFAULT_TAG.to_string()],
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reflection: true,
            tracing: true,
            descriptor_sets: Vec::new(),
            advertise_address: None,
            advertise_interface: None,
        }
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("random_port", &self.random_port)
            .field("tls", &self.tls.is_some())
            .field("validator", &self.validator.is_some())
            .field("interceptors", &self.interceptors)
            .field("keepalive", &self.keepalive)
            .field("registry", &self.registry.is_some())
            .field("tags", &self.tags)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("reflection", &self.reflection)
            .field("tracing", &self.tracing)
            .finish()
    }
}

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from the `server` and `registry` sections. Connects to
    /// etcd when the registry is enabled.
    pub async fn from_config(config: &NgrpcConfig) -> NgrpcResult<Self> {
        let server = &config.server;
        let mut options = Self::new()
            .with_address(&server.address)
            .with_random_port(server.random_port)
            .with_keepalive(KeepaliveOptions::from_secs(
                server.keepalive_interval_secs,
                server.keepalive_timeout_secs,
                server.tcp_keepalive_secs,
            ))
            .with_reflection(server.reflection)
            .with_tracing(server.tracing)
            .with_tags(config.registry.tags.clone())
            .with_heartbeat_interval(Duration::from_secs(config.registry.heartbeat_secs.max(1)));

        if let Some(name) = &server.name {
            options = options.with_name(name);
        }
        if let Some(files) = &server.tls {
            let tls = tls::server_tls_from_files(
                &files.cert_file,
                &files.key_file,
                files.client_ca_file.as_deref().map(Path::new),
            )
            .await?;
            options = options.with_tls(tls);
        }
        if let Some(auth) = &server.auth {
            options = options.with_validator(StaticCredentials::new(&auth.app_key, &auth.app_secret));
        }
        options.advertise_interface = server.advertise_interface.clone();

        if config.registry.enabled {
            let registry = EtcdRegistry::connect(
                &config.registry.endpoints,
                &etcd_options(&config.registry),
                &config.registry.domain,
            )
            .await?;
            options = options.with_registry(registry);
        }
        Ok(options)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Listen address; a bare `:port` means all interfaces
    pub fn with_address(mut self, address: impl AsRef<str>) -> Self {
        self.address = normalize_listen_address(address.as_ref());
        self
    }

    pub fn with_random_port(mut self, random_port: bool) -> Self {
        self.random_port = random_port;
        self
    }

    pub fn with_tls(mut self, tls: ServerTlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_validator(mut self, validator: impl CredentialValidator) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn with_interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: Interceptor + Clone + Send + Sync + 'static,
    {
        self.interceptors.push(interceptor);
        self
    }

    pub fn with_interceptors(mut self, interceptors: InterceptorChain) -> Self {
        self.interceptors.extend(&interceptors);
        self
    }

    pub fn with_keepalive(mut self, keepalive: KeepaliveOptions) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_registry(mut self, registry: impl Registry + 'static) -> Self {
        self.registry = Some(Box::new(registry));
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reflection(mut self, reflection: bool) -> Self {
        self.reflection = reflection;
        self
    }

    pub fn with_tracing(mut self, tracing: bool) -> Self {
        self.tracing = tracing;
        self
    }

    /// Expose another encoded file descriptor set through reflection
    pub fn with_descriptor_set(mut self, descriptor_set: &'static [u8]) -> Self {
        self.descriptor_sets.push(descriptor_set);
        self
    }

    pub fn with_advertise_address(mut self, address: impl Into<String>) -> Self {
        self.advertise_address = Some(address.into());
        self
    }
}

/// Client options
pub struct ClientOptions {
    pub name: String,

    /// Server address, used when no discovery is configured
    pub address: String,

    pub tls: Option<ClientTlsConfig>,

    /// Credential attached to every call
    pub credential: Option<CustomCredential>,

    /// Interceptors run after the credential is attached
    pub interceptors: InterceptorChain,

    pub keepalive: KeepaliveOptions,

    pub connect_timeout: Duration,

    /// Connect during construction instead of on first use
    pub block: bool,

    /// Resolves the target through the registry
    pub discovery: Option<Box<dyn Discovery>>,

    /// Service to discover; `name` when unset
    pub service: Option<String>,

    pub retry: RetryPolicy,

    /// Trace outgoing calls
    pub tracing: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            name: UNKNOWN_NAME.to_string(),
            address: DEFAULT_CLIENT_ADDRESS.to_string(),
            tls: None,
            credential: None,
            interceptors: InterceptorChain::new(),
            keepalive: KeepaliveOptions::default(),
            connect_timeout: Duration::from_secs(5),
            block: false,
            discovery: None,
            service: None,
            retry: RetryPolicy::default(),
            tracing: true,
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("tls", &self.tls.is_some())
            .field("credential", &self.credential)
            .field("interceptors", &self.interceptors)
            .field("keepalive", &self.keepalive)
            .field("connect_timeout", &self.connect_timeout)
            .field("block", &self.block)
            .field("discovery", &self.discovery.is_some())
            .field("service", &self.service)
            .field("retry", &self.retry)
            .field("tracing", &self.tracing)
            .finish()
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from the `client` and `registry` sections. Discovery is
    /// set up when the registry is enabled and a service is named.
    pub async fn from_config(config: &NgrpcConfig) -> NgrpcResult<Self> {
        let client: &ClientConfig = &config.client;
        let mut options = Self::new()
            .with_name(&client.name)
            .with_address(&client.address)
            .with_connect_timeout(Duration::from_secs(client.connect_timeout_secs.max(1)))
            .with_keepalive(KeepaliveOptions::from_secs(
                client.keepalive_interval_secs,
                client.keepalive_timeout_secs,
                None,
            ))
            .with_block(client.block)
            .with_retry(RetryPolicy::from(&client.retry))
            .with_tracing(client.tracing);

        if let Some(files) = &client.tls {
            let tls = match &files.ca_file {
                Some(ca) => tls::client_tls_from_file(ca, files.domain_name.as_deref()).await?,
                None => tls::client_tls_from_pem(None, files.domain_name.as_deref())?,
            };
            options = options.with_tls(tls);
        }
        if let Some(auth) = &client.auth {
            options = options.with_credential(CustomCredential::new(
                &auth.app_key,
                &auth.app_secret,
                client.tls.is_some(),
            ));
        }

        if config.registry.enabled {
            if let Some(service) = &client.service {
                let discovery = EtcdDiscovery::connect(
                    &config.registry.endpoints,
                    &etcd_options(&config.registry),
                    &config.registry.domain,
                )
                .await?;
                options = options.with_discovery(discovery).with_service(service);
            }
        }
        Ok(options)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_tls(mut self, tls: ClientTlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_credential(mut self, credential: CustomCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: Interceptor + Clone + Send + Sync + 'static,
    {
        self.interceptors.push(interceptor);
        self
    }

    pub fn with_interceptors(mut self, interceptors: InterceptorChain) -> Self {
        self.interceptors.extend(&interceptors);
        self
    }

    pub fn with_keepalive(mut self, keepalive: KeepaliveOptions) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_block(mut self, block: bool) -> Self {
        self.block = block;
        self
    }

    pub fn with_discovery(mut self, discovery: impl Discovery + 'static) -> Self {
        self.discovery = Some(Box::new(discovery));
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_tracing(mut self, tracing: bool) -> Self {
        self.tracing = tracing;
        self
    }

    /// Service name handed to discovery
    pub fn discovery_service(&self) -> &str {
        self.service.as_deref().unwrap_or(&self.name)
    }
}
