//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! File configuration
//!
//! Every field has a default, so a config file only needs to name what it
//! changes. Durations are whole seconds (`*_secs`) or milliseconds (`*_ms`).

use crate::error::{NgrpcError, NgrpcResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NgrpcConfig {
    /// Server settings
    pub server: ServerConfig,

    /// Client settings
    pub client: ClientConfig,

    /// Service registry settings
    pub registry: RegistryConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl NgrpcConfig {
    /// Load and validate a TOML config file
    pub async fn load(path: impl AsRef<Path>) -> NgrpcResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            NgrpcError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML config text
    pub fn from_toml_str(content: &str) -> NgrpcResult<Self> {
        let config: NgrpcConfig = toml::from_str(content).map_err(|e| {
            NgrpcError::Configuration(format!("Failed to parse config: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> NgrpcResult<()> {
        if self.server.address.trim().is_empty() {
            return Err(NgrpcError::configuration("server.address must not be empty"));
        }
        if let Some(tls) = &self.server.tls {
            if tls.cert_file.trim().is_empty() || tls.key_file.trim().is_empty() {
                return Err(NgrpcError::configuration(
                    "server.tls requires cert_file and key_file",
                ));
            }
        }
        if self.client.address.trim().is_empty() && self.client.service.is_none() {
            return Err(NgrpcError::configuration(
                "client needs an address or a service to discover",
            ));
        }
        if self.client.retry.max_attempts == 0 {
            return Err(NgrpcError::configuration(
                "client.retry.max_attempts must be at least 1",
            ));
        }
        if self.registry.enabled {
            if self.registry.endpoints.is_empty() {
                return Err(NgrpcError::configuration(
                    "registry.endpoints must not be empty when the registry is enabled",
                ));
            }
            if self.registry.domain.trim().is_empty() {
                return Err(NgrpcError::configuration("registry.domain must not be empty"));
            }
            if self.registry.heartbeat_secs == 0 {
                return Err(NgrpcError::configuration(
                    "registry.heartbeat_secs must be at least 1",
                ));
            }
        }
        Ok(())
    }
}

/// Shared key/secret pair for custom authentication
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub app_key: String,
    pub app_secret: String,
}

/// Server TLS files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTlsSettings {
    /// PEM certificate chain
    pub cert_file: String,

    /// PEM private key
    pub key_file: String,

    /// CA used to verify client certificates; enables mutual TLS
    #[serde(default)]
    pub client_ca_file: Option<String>,
}

/// Client TLS files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientTlsSettings {
    /// PEM CA used to verify the server; system roots when absent
    pub ca_file: Option<String>,

    /// Server name override
    pub domain_name: Option<String>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Service name; the hostname when absent
    pub name: Option<String>,

    /// Listen address, `host:port` or `:port`
    pub address: String,

    /// Bind an OS-assigned port instead of the configured one
    pub random_port: bool,

    pub tls: Option<ServerTlsSettings>,

    /// Require clients to present this key/secret pair
    pub auth: Option<AuthConfig>,

    pub keepalive_interval_secs: Option<u64>,

    pub keepalive_timeout_secs: Option<u64>,

    pub tcp_keepalive_secs: Option<u64>,

    /// Serve the reflection service
    pub reflection: bool,

    /// Trace incoming calls
    pub tracing: bool,

    /// Interface whose IPv4 address is advertised when listening on all
    /// interfaces
    pub advertise_interface: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: None,
            address: "0.0.0.0:5000".to_string(),
            random_port: false,
            tls: None,
            auth: None,
            keepalive_interval_secs: None,
            keepalive_timeout_secs: None,
            tcp_keepalive_secs: None,
            reflection: true,
            tracing: true,
            advertise_interface: None,
        }
    }
}

/// Call-level retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Fixed delay between attempts
    pub backoff_ms: u64,

    /// Deadline for a single attempt
    pub per_attempt_timeout_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1,
            per_attempt_timeout_ms: None,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub name: String,

    /// Server address, used when no service is discovered
    pub address: String,

    /// Service to resolve through the registry
    pub service: Option<String>,

    pub tls: Option<ClientTlsSettings>,

    /// Key/secret pair sent with every call
    pub auth: Option<AuthConfig>,

    pub connect_timeout_secs: u64,

    pub keepalive_interval_secs: Option<u64>,

    pub keepalive_timeout_secs: Option<u64>,

    /// Connect eagerly and fail construction when the server is unreachable
    pub block: bool,

    pub retry: RetryConfig,

    /// Trace outgoing calls
    pub tracing: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            address: "127.0.0.1:5000".to_string(),
            service: None,
            tls: None,
            auth: None,
            connect_timeout_secs: 5,
            keepalive_interval_secs: None,
            keepalive_timeout_secs: None,
            block: false,
            retry: RetryConfig::default(),
            tracing: true,
        }
    }
}

/// etcd registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub enabled: bool,

    /// etcd endpoints
    pub endpoints: Vec<String>,

    /// Key prefix shared by registrations and discovery
    pub domain: String,

    /// Heartbeat interval, which is also the lease TTL
    pub heartbeat_secs: u64,

    /// Tags published with the registration
    pub tags: Vec<String>,

    pub connect_timeout_secs: u64,

    /// etcd username and password
    pub user: Option<(String, String)>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            domain: "svc".to_string(),
            heartbeat_secs: 10,
            tags: vec!["grpc".to_string()],
            connect_timeout_secs: 5,
            user: None,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG`
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = NgrpcConfig::from_toml_str("").unwrap();
        assert_eq!(config.server.address, "0.0.0.0:5000");
        assert!(config.server.reflection);
        assert_eq!(config.client.name, "unknown");
        assert_eq!(config.client.retry.max_attempts, 3);
        assert!(!config.registry.enabled);
        assert_eq!(config.registry.domain, "svc");
        assert_eq!(config.registry.heartbeat_secs, 10);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_partial_sections() {
        let config = NgrpcConfig::from_toml_str(
            r#"
            [server]
            name = "orders"
            address = ":7000"

            [server.auth]
            app_key = "k"
            app_secret = "s"

            [registry]
            enabled = true
            endpoints = ["http://etcd:2379"]
            tags = ["grpc", "v2"]

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.name.as_deref(), Some("orders"));
        assert_eq!(config.server.address, ":7000");
        assert_eq!(config.server.auth.unwrap().app_key, "k");
        assert!(config.registry.enabled);
        assert_eq!(config.registry.domain, "svc");
        assert_eq!(config.registry.tags, vec!["grpc", "v2"]);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_enabled_registry_needs_endpoints() {
        let result = NgrpcConfig::from_toml_str(
            r#"
            [registry]
            enabled = true
            endpoints = []
            "#,
        );
        assert!(matches!(result, Err(NgrpcError::Configuration(_))));
    }

    #[test]
    fn test_zero_retry_attempts_rejected() {
        let result = NgrpcConfig::from_toml_str(
            r#"
            [client.retry]
            max_attempts = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let result = NgrpcConfig::from_toml_str("[server\naddress = 1");
        assert!(matches!(result, Err(NgrpcError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[client]\naddress = \"10.0.0.1:6000\"\nblock = true").unwrap();

        let config = NgrpcConfig::load(file.path()).await.unwrap();
        assert_eq!(config.client.address, "10.0.0.1:6000");
        assert!(config.client.block);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = NgrpcConfig::load("/nonexistent/ngrpc.toml").await;
        assert!(matches!(result, Err(NgrpcError::Configuration(_))));
    }
}
