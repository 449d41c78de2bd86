//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! gRPC server lifecycle
//!
//! A [`Server`] collects services, then [`Server::start`] binds the listener,
//! spawns the serve task and publishes the instance to the registry.
//! [`Server::close`] withdraws the registration before draining connections.

use crate::auth::{CredentialValidator, ValidationInterceptor};
use crate::error::{NgrpcError, NgrpcResult};
use crate::interceptor::InterceptorChain;
use crate::options::{KeepaliveOptions, ServerOptions};
use crate::telemetry::ServerTraceLayer;
use crate::tls;
use crate::util::local_ipv4;
use ngrpc_resolver::{Registry, ServiceInfo};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tonic::body::BoxBody;
use tonic::server::NamedService;
use tonic::service::RoutesBuilder;
use tonic::transport::server::TcpIncoming;
use tonic::transport::ServerTlsConfig;
use tonic_health::server::HealthReporter;
use tonic_health::ServingStatus;
use tower::{Service, ServiceBuilder};
use tracing::{debug, error, info, warn};

struct Running {
    local_addr: SocketAddr,
    advertise_address: String,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<(), tonic::transport::Error>>,
}

/// gRPC server with health, reflection and optional registration
pub struct Server {
    name: String,
    address: String,
    random_port: bool,
    tls: Option<ServerTlsConfig>,
    keepalive: KeepaliveOptions,
    chain: InterceptorChain,
    tracing: bool,
    reflection: bool,
    descriptor_sets: Vec<&'static [u8]>,
    registry: Option<Box<dyn Registry>>,
    tags: Vec<String>,
    heartbeat_interval: Duration,
    advertise_address: Option<String>,
    advertise_interface: Option<String>,
    routes: Option<RoutesBuilder>,
    services: Vec<&'static str>,
    health: HealthReporter,
    running: Option<Running>,
}

impl Server {
    /// Plaintext server
    pub fn new(address: impl AsRef<str>, interceptors: InterceptorChain) -> Self {
        Self::from_options(
            ServerOptions::new()
                .with_address(address)
                .with_interceptors(interceptors),
        )
    }

    /// TLS server from PEM files. A client CA enables mutual TLS.
    pub async fn new_tls_from_files(
        address: impl AsRef<str>,
        cert_file: impl AsRef<Path>,
        key_file: impl AsRef<Path>,
        client_ca_file: Option<&Path>,
        interceptors: InterceptorChain,
    ) -> NgrpcResult<Self> {
        let tls = tls::server_tls_from_files(cert_file, key_file, client_ca_file).await?;
        Ok(Self::new_tls(address, tls, interceptors))
    }

    /// TLS server
    pub fn new_tls(
        address: impl AsRef<str>,
        tls: ServerTlsConfig,
        interceptors: InterceptorChain,
    ) -> Self {
        Self::from_options(
            ServerOptions::new()
                .with_address(address)
                .with_tls(tls)
                .with_interceptors(interceptors),
        )
    }

    /// Plaintext server validating `app_key`/`app_secret` on every call
    pub fn new_custom_authentication(
        address: impl AsRef<str>,
        validator: impl CredentialValidator,
        interceptors: InterceptorChain,
    ) -> Self {
        Self::from_options(
            ServerOptions::new()
                .with_address(address)
                .with_validator(validator)
                .with_interceptors(interceptors),
        )
    }

    /// TLS server validating `app_key`/`app_secret` on every call
    pub fn new_tls_custom_authentication(
        address: impl AsRef<str>,
        tls: ServerTlsConfig,
        validator: impl CredentialValidator,
        interceptors: InterceptorChain,
    ) -> Self {
        Self::from_options(
            ServerOptions::new()
                .with_address(address)
                .with_tls(tls)
                .with_validator(validator)
                .with_interceptors(interceptors),
        )
    }

    pub fn from_options(options: ServerOptions) -> Self {
        let ServerOptions {
            name,
            address,
            random_port,
            tls,
            validator,
            interceptors,
            keepalive,
            registry,
            tags,
            heartbeat_interval,
            reflection,
            tracing,
            descriptor_sets,
            advertise_address,
            advertise_interface,
        } = options;

        let mut chain = InterceptorChain::new();
        if let Some(validator) = validator {
            chain.push(ValidationInterceptor::from_arc(validator));
        }
        chain.extend(&interceptors);

        let (health, health_service) = tonic_health::server::health_reporter();
        let mut routes = RoutesBuilder::default();
        routes.add_service(health_service);

        Self {
            name,
            address,
            random_port,
            tls,
            keepalive,
            chain,
            tracing,
            reflection,
            descriptor_sets,
            registry,
            tags,
            heartbeat_interval,
            advertise_address,
            advertise_interface,
            routes: Some(routes),
            services: Vec::new(),
            health,
            running: None,
        }
    }

    /// Add a generated service. Services must be added before `start`.
    pub fn add_service<S>(&mut self, service: S) -> NgrpcResult<&mut Self>
    where
        S: Service<
                http::Request<BoxBody>,
                Response = http::Response<BoxBody>,
                Error = Infallible,
            > + NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let Some(routes) = self.routes.as_mut() else {
            return Err(NgrpcError::Server(format!(
                "cannot add {} after the server started",
                S::NAME
            )));
        };
        routes.add_service(service);
        self.services.push(S::NAME);
        debug!("Added service {}", S::NAME);
        Ok(self)
    }

    /// Reporter for the built-in health service
    pub fn health_reporter(&self) -> HealthReporter {
        self.health.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bound address once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// Address published to the registry once started
    pub fn advertise_address(&self) -> Option<&str> {
        self.running
            .as_ref()
            .map(|running| running.advertise_address.as_str())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn bind_address(&self) -> String {
        if !self.random_port {
            return self.address.clone();
        }
        match self.address.rsplit_once(':') {
            Some((host, _)) => format!("{}:0", host),
            None => format!("{}:0", self.address),
        }
    }

    fn resolve_advertise_address(&self, local: SocketAddr) -> NgrpcResult<String> {
        if let Some(address) = &self.advertise_address {
            return Ok(address.clone());
        }
        if local.ip().is_unspecified() {
            let ip = local_ipv4(self.advertise_interface.as_deref())?;
            return Ok(SocketAddr::new(ip.into(), local.port()).to_string());
        }
        Ok(local.to_string())
    }

    async fn set_status(&self, status: ServingStatus) {
        let mut reporter = self.health.clone();
        reporter.set_service_status("", status).await;
        reporter.set_service_status(&self.name, status).await;
        for service in &self.services {
            reporter.set_service_status(*service, status).await;
        }
    }

    /// Bind, serve in the background and register.
    ///
    /// Failures before serving leave the server unstarted, so `start` can be
    /// retried. A registration failure stops the server and is returned.
    pub async fn start(&mut self) -> NgrpcResult<()> {
        if self.routes.is_none() {
            return Err(NgrpcError::Server(format!(
                "server {} already started",
                self.name
            )));
        }

        let bind = self.bind_address();
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| NgrpcError::Server(format!("Failed to bind {}: {}", bind, e)))?;
        let local_addr = listener.local_addr()?;

        let advertise_address = match self.resolve_advertise_address(local_addr) {
            Ok(address) => address,
            Err(e) if self.registry.is_none() => {
                debug!("Using bound address for {}: {}", self.name, e);
                local_addr.to_string()
            }
            Err(e) => return Err(e),
        };

        let reflection = if self.reflection {
            let mut builder = tonic_reflection::server::Builder::configure()
                .register_encoded_file_descriptor_set(tonic_health::pb::FILE_DESCRIPTOR_SET);
            for descriptor_set in &self.descriptor_sets {
                builder = builder.register_encoded_file_descriptor_set(*descriptor_set);
            }
            let service = builder
                .build_v1()
                .map_err(|e| NgrpcError::Configuration(format!("Invalid descriptor set: {}", e)))?;
            Some(service)
        } else {
            None
        };

        let mut builder = tonic::transport::Server::builder()
            .http2_keepalive_interval(self.keepalive.interval)
            .http2_keepalive_timeout(self.keepalive.timeout);
        if let Some(tls) = self.tls.clone() {
            builder = builder.tls_config(tls)?;
        }

        let incoming = TcpIncoming::from_listener(listener, true, self.keepalive.tcp)
            .map_err(|e| NgrpcError::Server(format!("Failed to accept on {}: {}", local_addr, e)))?;

        let Some(mut routes) = self.routes.take() else {
            return Err(NgrpcError::Internal(format!(
                "server {} lost its routes",
                self.name
            )));
        };
        if let Some(reflection) = reflection {
            routes.add_service(reflection);
        }

        let layer = ServiceBuilder::new()
            .layer(ServerTraceLayer::new(self.tracing))
            .layer(tonic::service::interceptor(self.chain.clone()))
            .into_inner();
        let router = builder.layer(layer).add_routes(routes.routes());

        self.set_status(ServingStatus::Serving).await;
        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(router.serve_with_incoming_shutdown(incoming, async move {
            let _ = signal.await;
        }));

        info!(
            "Server {} listening on {} (tls: {}, reflection: {})",
            self.name,
            local_addr,
            self.tls.is_some(),
            self.reflection
        );

        self.running = Some(Running {
            local_addr,
            advertise_address: advertise_address.clone(),
            shutdown,
            task,
        });

        if let Some(registry) = self.registry.as_mut() {
            let info = ServiceInfo::new(&self.name, &advertise_address)
                .with_tags(self.tags.clone())
                .with_interval(self.heartbeat_interval);
            if let Err(e) = registry.register(&info).await {
                error!("Failed to register {}: {}", self.name, e);
                if let Err(stop_error) = self.stop().await {
                    warn!("Failed to stop {}: {}", self.name, stop_error);
                }
                return Err(e.into());
            }
            info!("Registered {} at {}", self.name, advertise_address);
        }

        Ok(())
    }

    /// Start, wait for `signal`, then close
    pub async fn serve_until<F>(&mut self, signal: F) -> NgrpcResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        signal.await;
        self.close().await
    }

    async fn stop(&mut self) -> NgrpcResult<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        self.set_status(ServingStatus::NotServing).await;
        let _ = running.shutdown.send(());

        match running.task.await {
            Ok(Ok(())) => {
                info!("Server {} stopped", self.name);
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Server {} failed: {}", self.name, e);
                Err(NgrpcError::Transport(e.to_string()))
            }
            Err(e) => Err(NgrpcError::Shutdown(e.to_string())),
        }
    }

    /// Withdraw the registration, mark services not serving and drain
    /// connections. Closing twice is a no-op.
    pub async fn close(&mut self) -> NgrpcResult<()> {
        let mut result = Ok(());
        if let Some(registry) = self.registry.as_mut() {
            if let Err(e) = registry.close().await {
                warn!("Failed to deregister {}: {}", self.name, e);
                result = Err(e.into());
            }
        }

        let stopped = self.stop().await;
        result.and(stopped)
    }
}
