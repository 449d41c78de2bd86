//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! Error types for ngrpc

use ngrpc_resolver::ResolverError;
use thiserror::Error;

/// Result type for ngrpc operations
pub type NgrpcResult<T> = Result<T, NgrpcError>;

/// Error type for ngrpc operations
#[derive(Error, Debug)]
pub enum NgrpcError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Credential requires transport security but the client is plaintext")]
    InsecureCredential,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Shutdown error: {0}")]
    Shutdown(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NgrpcError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }
}

impl From<std::io::Error> for NgrpcError {
    fn from(err: std::io::Error) -> Self {
        NgrpcError::Io(err.to_string())
    }
}

impl From<tonic::transport::Error> for NgrpcError {
    fn from(err: tonic::transport::Error) -> Self {
        NgrpcError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for NgrpcError {
    fn from(err: serde_json::Error) -> Self {
        NgrpcError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for NgrpcError {
    fn from(err: toml::de::Error) -> Self {
        NgrpcError::Configuration(err.to_string())
    }
}

impl From<tokio::task::JoinError> for NgrpcError {
    fn from(err: tokio::task::JoinError) -> Self {
        NgrpcError::Internal(err.to_string())
    }
}
