//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! Key/secret call authentication
//!
//! Clients stamp `app_key` and `app_secret` metadata on every call with
//! [`CustomCredential`]; servers check the pair with a
//! [`CredentialValidator`] through [`ValidationInterceptor`].

use crate::error::{NgrpcError, NgrpcResult};
use std::fmt;
use std::sync::Arc;
use tonic::metadata::AsciiMetadataValue;
use tonic::service::Interceptor;
use tonic::{Request, Status};
use tracing::debug;

/// Metadata key carrying the application key
pub const APP_KEY: &str = "app_key";

/// Metadata key carrying the application secret
pub const APP_SECRET: &str = "app_secret";

/// Per-call key/secret credential
#[derive(Clone, PartialEq, Eq)]
pub struct CustomCredential {
    app_key: String,
    app_secret: String,
    require_transport_security: bool,
}

impl CustomCredential {
    pub fn new(
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
        require_transport_security: bool,
    ) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            require_transport_security,
        }
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// Whether this credential may only travel over TLS
    pub fn require_transport_security(&self) -> bool {
        self.require_transport_security
    }

    /// Metadata pairs attached to each call
    pub fn request_metadata(&self) -> Vec<(&'static str, String)> {
        vec![
            (APP_KEY, self.app_key.clone()),
            (APP_SECRET, self.app_secret.clone()),
        ]
    }

    /// Interceptor that attaches this credential to outgoing calls
    pub fn interceptor(&self) -> NgrpcResult<CredentialInterceptor> {
        let parse = |name: &str, value: &str| {
            value.parse::<AsciiMetadataValue>().map_err(|e| {
                NgrpcError::Credential(format!("{} is not valid metadata: {}", name, e))
            })
        };
        Ok(CredentialInterceptor {
            app_key: parse(APP_KEY, &self.app_key)?,
            app_secret: parse(APP_SECRET, &self.app_secret)?,
        })
    }
}

impl fmt::Debug for CustomCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomCredential")
            .field("app_key", &self.app_key)
            .field("app_secret", &"<redacted>")
            .field("require_transport_security", &self.require_transport_security)
            .finish()
    }
}

/// Attaches a [`CustomCredential`] to outgoing calls
#[derive(Clone)]
pub struct CredentialInterceptor {
    app_key: AsciiMetadataValue,
    app_secret: AsciiMetadataValue,
}

impl Interceptor for CredentialInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let metadata = request.metadata_mut();
        metadata.insert(APP_KEY, self.app_key.clone());
        metadata.insert(APP_SECRET, self.app_secret.clone());
        Ok(request)
    }
}

/// Decides whether a key/secret pair is allowed to call the server
pub trait CredentialValidator: Send + Sync + 'static {
    fn validate(&self, app_key: &str, app_secret: &str) -> bool;
}

impl<F> CredentialValidator for F
where
    F: Fn(&str, &str) -> bool + Send + Sync + 'static,
{
    fn validate(&self, app_key: &str, app_secret: &str) -> bool {
        self(app_key, app_secret)
    }
}

/// Accepts exactly one key/secret pair
#[derive(Clone)]
pub struct StaticCredentials {
    app_key: String,
    app_secret: String,
}

impl StaticCredentials {
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
        }
    }
}

impl CredentialValidator for StaticCredentials {
    fn validate(&self, app_key: &str, app_secret: &str) -> bool {
        !self.app_key.is_empty() && self.app_key == app_key && self.app_secret == app_secret
    }
}

/// Rejects calls whose credential the validator refuses
#[derive(Clone)]
pub struct ValidationInterceptor {
    validator: Arc<dyn CredentialValidator>,
}

impl ValidationInterceptor {
    pub fn new(validator: impl CredentialValidator) -> Self {
        Self {
            validator: Arc::new(validator),
        }
    }

    pub fn from_arc(validator: Arc<dyn CredentialValidator>) -> Self {
        Self { validator }
    }
}

fn metadata_str<'a>(request: &'a Request<()>, key: &str) -> &'a str {
    request
        .metadata()
        .get(key)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

impl Interceptor for ValidationInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let app_key = metadata_str(&request, APP_KEY);
        let app_secret = metadata_str(&request, APP_SECRET);

        if !self.validator.validate(app_key, app_secret) {
            debug!("Rejected call with app_key {:?}", app_key);
            return Err(Status::unauthenticated("invalid credentials"));
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    fn stamped(credential: &CustomCredential) -> Request<()> {
        let mut interceptor = credential.interceptor().unwrap();
        interceptor.call(Request::new(())).unwrap()
    }

    #[test]
    fn test_credential_metadata() {
        let credential = CustomCredential::new("key", "secret", false);
        assert_eq!(
            credential.request_metadata(),
            vec![(APP_KEY, "key".to_string()), (APP_SECRET, "secret".to_string())]
        );

        let request = stamped(&credential);
        assert_eq!(request.metadata().get(APP_KEY).unwrap(), "key");
        assert_eq!(request.metadata().get(APP_SECRET).unwrap(), "secret");
    }

    #[test]
    fn test_debug_hides_secret() {
        let credential = CustomCredential::new("key", "hunter2", true);
        let debug = format!("{:?}", credential);
        assert!(debug.contains("key"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_non_ascii_credential_is_rejected() {
        let credential = CustomCredential::new("key\n", "secret", false);
        assert!(matches!(
            credential.interceptor(),
            Err(NgrpcError::Credential(_))
        ));
    }

    #[test]
    fn test_validation_accepts_matching_pair() {
        let mut interceptor = ValidationInterceptor::new(StaticCredentials::new("key", "secret"));
        let request = stamped(&CustomCredential::new("key", "secret", false));
        assert!(interceptor.call(request).is_ok());
    }

    #[test]
    fn test_validation_rejects_wrong_pair() {
        let mut interceptor = ValidationInterceptor::new(StaticCredentials::new("key", "secret"));
        let request = stamped(&CustomCredential::new("key", "wrong", false));
        let status = interceptor.call(request).unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated);
        assert_eq!(status.message(), "invalid credentials");
    }

    #[test]
    fn test_missing_metadata_is_empty_strings() {
        let mut interceptor = ValidationInterceptor::new(|key: &str, secret: &str| {
            key.is_empty() && secret.is_empty()
        });
        assert!(interceptor.call(Request::new(())).is_ok());

        let mut strict = ValidationInterceptor::new(StaticCredentials::new("key", "secret"));
        let status = strict.call(Request::new(())).unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated);
    }
}
