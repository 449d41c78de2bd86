//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! Interceptor composition and stock interceptors

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tonic::metadata::AsciiMetadataValue;
use tonic::service::Interceptor;
use tonic::{Request, Status};

/// Metadata key for request ids
pub const REQUEST_ID: &str = "x-request-id";

type Step = Arc<dyn Fn(Request<()>) -> Result<Request<()>, Status> + Send + Sync>;

/// Ordered list of interceptors applied as one.
///
/// Steps run in insertion order and the first `Status` short-circuits the
/// rest.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    steps: Vec<Step>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor
    pub fn push<I>(&mut self, interceptor: I) -> &mut Self
    where
        I: Interceptor + Clone + Send + Sync + 'static,
    {
        self.steps.push(Arc::new(move |request: Request<()>| {
            interceptor.clone().call(request)
        }));
        self
    }

    /// Builder form of [`InterceptorChain::push`]
    pub fn with<I>(mut self, interceptor: I) -> Self
    where
        I: Interceptor + Clone + Send + Sync + 'static,
    {
        self.push(interceptor);
        self
    }

    /// Append every step of `other`
    pub fn extend(&mut self, other: &InterceptorChain) -> &mut Self {
        self.steps.extend(other.steps.iter().cloned());
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl Interceptor for InterceptorChain {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        for step in &self.steps {
            request = step(request)?;
        }
        Ok(request)
    }
}

/// Run a request-context handler before every call. The handler may edit
/// metadata and extensions and cannot fail.
pub fn context_interceptor<F>(
    handler: F,
) -> impl Fn(Request<()>) -> Result<Request<()>, Status> + Clone + Send + Sync + 'static
where
    F: Fn(&mut Request<()>) + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    move |mut request: Request<()>| {
        handler(&mut request);
        Ok(request)
    }
}

/// Tag calls with a UUID v4 `x-request-id` unless one is already set
pub fn request_id_interceptor(
) -> impl Fn(Request<()>) -> Result<Request<()>, Status> + Clone + Send + Sync + 'static {
    |mut request: Request<()>| {
        if !request.metadata().contains_key(REQUEST_ID) {
            let id = uuid::Uuid::new_v4().to_string();
            let value: AsciiMetadataValue = id
                .parse()
                .map_err(|_| Status::internal("request id is not valid metadata"))?;
            request.metadata_mut().insert(REQUEST_ID, value);
        }
        Ok(request)
    }
}

/// Give every call a deadline
pub fn timeout_interceptor(
    timeout: Duration,
) -> impl Fn(Request<()>) -> Result<Request<()>, Status> + Clone + Send + Sync + 'static {
    move |mut request: Request<()>| {
        request.set_timeout(timeout);
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct Tenant(&'static str);

    #[test]
    fn test_chain_runs_in_order() {
        let mut chain = InterceptorChain::new()
            .with(|mut request: Request<()>| -> Result<Request<()>, Status> {
                request.metadata_mut().insert("x-step", "first".parse().unwrap());
                Ok(request)
            })
            .with(|mut request: Request<()>| -> Result<Request<()>, Status> {
                let seen = request.metadata().get("x-step").cloned();
                assert_eq!(seen.unwrap(), "first");
                request.metadata_mut().insert("x-step", "second".parse().unwrap());
                Ok(request)
            });

        let request = chain.call(Request::new(())).unwrap();
        assert_eq!(request.metadata().get("x-step").unwrap(), "second");
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_chain_stops_at_first_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut chain = InterceptorChain::new()
            .with(|_request: Request<()>| -> Result<Request<()>, Status> {
                Err(Status::permission_denied("nope"))
            })
            .with(move |request: Request<()>| -> Result<Request<()>, Status> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(request)
            });

        let status = chain.call(Request::new(())).unwrap_err();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_chain_passes_through() {
        let mut chain = InterceptorChain::new();
        assert!(chain.is_empty());
        assert!(chain.call(Request::new(())).is_ok());
    }

    #[test]
    fn test_context_interceptor_edits_extensions() {
        let mut chain = InterceptorChain::new().with(context_interceptor(|request| {
            request.extensions_mut().insert(Tenant("acme"));
        }));
        let request = chain.call(Request::new(())).unwrap();
        assert_eq!(request.extensions().get::<Tenant>().unwrap().0, "acme");
    }

    #[test]
    fn test_request_id_is_kept_when_present() {
        let interceptor = request_id_interceptor();
        let generated = interceptor(Request::new(())).unwrap();
        let id = generated.metadata().get(REQUEST_ID).unwrap().to_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());

        let mut request = Request::new(());
        request.metadata_mut().insert(REQUEST_ID, "fixed".parse().unwrap());
        let kept = interceptor(request).unwrap();
        assert_eq!(kept.metadata().get(REQUEST_ID).unwrap(), "fixed");
    }

    #[test]
    fn test_timeout_sets_grpc_timeout_header() {
        let mut chain = InterceptorChain::new().with(timeout_interceptor(Duration::from_secs(2)));
        let request = chain.call(Request::new(())).unwrap();
        assert!(request.metadata().get("grpc-timeout").is_some());
    }

    #[test]
    fn test_extend_appends_steps() {
        let mut base = InterceptorChain::new().with(request_id_interceptor());
        let extra = InterceptorChain::new().with(timeout_interceptor(Duration::from_secs(1)));
        base.extend(&extra);
        assert_eq!(base.len(), 2);
    }
}
