//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! Error types for service registration and discovery

use thiserror::Error;

/// Result type for resolver operations
pub type ResolverResult<T> = Result<T, ResolverError>;

/// Error type for registration, discovery and coordination store operations
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Lease error: {0}")]
    LeaseError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Registration error: {0}")]
    RegistrationError(String),

    #[error("Deregistration error: {0}")]
    DeregistrationError(String),

    #[error("Service already registered under key: {0}")]
    AlreadyRegistered(String),

    #[error("Discovery error: {0}")]
    DiscoveryError(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Invalid service info: {0}")]
    InvalidServiceInfo(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for ResolverError {
    fn from(err: serde_json::Error) -> Self {
        ResolverError::Serialization(err.to_string())
    }
}

impl From<etcd_client::Error> for ResolverError {
    fn from(err: etcd_client::Error) -> Self {
        ResolverError::StoreError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ResolverError {
    fn from(err: tokio::task::JoinError) -> Self {
        ResolverError::Internal(err.to_string())
    }
}
