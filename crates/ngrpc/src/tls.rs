//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! TLS configuration
//!
//! PEM material is checked up front so a missing key or an empty
//! certificate file fails at construction instead of on the first handshake.

use crate::error::{NgrpcError, NgrpcResult};
use std::path::Path;
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};
use tracing::{debug, info};

async fn read_pem(path: &Path, what: &str) -> NgrpcResult<Vec<u8>> {
    if !path.exists() {
        return Err(NgrpcError::Tls(format!(
            "{} file not found: {}",
            what,
            path.display()
        )));
    }
    tokio::fs::read(path).await.map_err(|e| {
        NgrpcError::Tls(format!(
            "Failed to read {} file {}: {}",
            what,
            path.display(),
            e
        ))
    })
}

/// Check that `pem` holds at least one certificate
fn validate_certificates(pem: &[u8], what: &str) -> NgrpcResult<usize> {
    let mut reader = pem;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| NgrpcError::Tls(format!("Failed to parse {}: {}", what, e)))?;

    if certs.is_empty() {
        return Err(NgrpcError::Tls(format!("No certificates found in {}", what)));
    }
    Ok(certs.len())
}

/// Check that `pem` holds a PKCS#1, PKCS#8 or SEC1 private key
fn validate_private_key(pem: &[u8]) -> NgrpcResult<()> {
    let mut reader = pem;
    match rustls_pemfile::private_key(&mut reader) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(NgrpcError::Tls("No private key found".to_string())),
        Err(e) => Err(NgrpcError::Tls(format!("Failed to parse private key: {}", e))),
    }
}

/// Server TLS from PEM bytes. A client CA enables mutual TLS.
pub fn server_tls_from_pem(
    cert_pem: &[u8],
    key_pem: &[u8],
    client_ca_pem: Option<&[u8]>,
) -> NgrpcResult<ServerTlsConfig> {
    let count = validate_certificates(cert_pem, "server certificate")?;
    validate_private_key(key_pem)?;
    debug!("Loaded {} server certificates", count);

    let mut config = ServerTlsConfig::new().identity(Identity::from_pem(cert_pem, key_pem));
    if let Some(ca) = client_ca_pem {
        validate_certificates(ca, "client CA")?;
        config = config.client_ca_root(Certificate::from_pem(ca));
        info!("Mutual TLS enabled");
    }
    Ok(config)
}

/// Server TLS from certificate and key files
pub async fn server_tls_from_files(
    cert_file: impl AsRef<Path>,
    key_file: impl AsRef<Path>,
    client_ca_file: Option<&Path>,
) -> NgrpcResult<ServerTlsConfig> {
    let cert = read_pem(cert_file.as_ref(), "Certificate").await?;
    let key = read_pem(key_file.as_ref(), "Private key").await?;
    let ca = match client_ca_file {
        Some(path) => Some(read_pem(path, "Client CA").await?),
        None => None,
    };
    server_tls_from_pem(&cert, &key, ca.as_deref())
}

/// Client TLS trusting `ca_pem`, or the platform roots when absent
pub fn client_tls_from_pem(
    ca_pem: Option<&[u8]>,
    domain_name: Option<&str>,
) -> NgrpcResult<ClientTlsConfig> {
    let mut config = ClientTlsConfig::new();
    match ca_pem {
        Some(ca) => {
            validate_certificates(ca, "CA certificate")?;
            config = config.ca_certificate(Certificate::from_pem(ca));
        }
        None => config = config.with_native_roots(),
    }
    if let Some(name) = domain_name.filter(|name| !name.is_empty()) {
        config = config.domain_name(name);
    }
    Ok(config)
}

/// Client TLS from a CA file
pub async fn client_tls_from_file(
    ca_file: impl AsRef<Path>,
    domain_name: Option<&str>,
) -> NgrpcResult<ClientTlsConfig> {
    let ca = read_pem(ca_file.as_ref(), "CA certificate").await?;
    client_tls_from_pem(Some(&ca), domain_name)
}
