//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! Client and server construction around `tonic`
//!
//! This crate wires the pieces a gRPC service usually needs:
//!
//! - [`Server`] and [`Client`] constructors for plaintext, TLS and
//!   key/secret-authenticated transports
//! - credential stamping and validation interceptors ([`auth`])
//! - an [`InterceptorChain`] for composing request interceptors
//! - span creation and trace-context propagation ([`telemetry`])
//! - registration and discovery through etcd, re-exported from
//!   `ngrpc-resolver`
//!
//! ```no_run
//! use ngrpc::{InterceptorChain, Server, StaticCredentials};
//!
//! # async fn run() -> ngrpc::NgrpcResult<()> {
//! let mut server = Server::new_custom_authentication(
//!     "0.0.0.0:5000",
//!     StaticCredentials::new("key", "secret"),
//!     InterceptorChain::new(),
//! );
//! server.start().await?;
//! server.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod logging;
pub mod options;
pub mod retry;
pub mod server;
pub mod telemetry;
pub mod tls;
pub mod util;

pub use auth::{
    CredentialInterceptor, CredentialValidator, CustomCredential, StaticCredentials,
    ValidationInterceptor, APP_KEY, APP_SECRET,
};
pub use client::{Client, ClientChannel};
pub use config::NgrpcConfig;
pub use error::{NgrpcError, NgrpcResult};
pub use interceptor::InterceptorChain;
pub use logging::init_logging;
pub use options::{ClientOptions, KeepaliveOptions, ServerOptions};
pub use retry::RetryPolicy;
pub use server::Server;
pub use telemetry::install_propagator;

pub use ngrpc_resolver as resolver;
pub use ngrpc_resolver::{
    Discovery, EtcdDiscovery, EtcdRegistry, MemoryStore, Registry, ServiceInfo,
};
