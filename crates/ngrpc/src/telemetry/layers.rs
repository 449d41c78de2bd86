//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! Tower layers that open a span per gRPC call

use super::carriers::{HeaderExtractor, HeaderInjector};
use super::{COMPONENT, COMPONENT_VALUE, TRACER_NAME};
use futures::future::BoxFuture;
use http::{HeaderMap, Request, Response};
use opentelemetry::global;
use opentelemetry::trace::{FutureExt, SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use std::fmt;
use std::task::Poll;
use tower::{Layer, Service};

const GRPC_STATUS: &str = "grpc-status";

fn start_span(path: &str, kind: SpanKind, parent: &Context) -> Context {
    let tracer = global::tracer(TRACER_NAME);
    let span = tracer
        .span_builder(path.to_string())
        .with_kind(kind)
        .with_attributes(vec![
            KeyValue::new(COMPONENT, COMPONENT_VALUE),
            KeyValue::new("rpc.system", "grpc"),
        ])
        .start_with_context(&tracer, parent);
    parent.with_span(span)
}

/// Record the call outcome on the span in `cx` and end it
fn finish_span<B, E: fmt::Display>(cx: &Context, result: &Result<Response<B>, E>) {
    let span = cx.span();
    match result {
        Ok(response) => {
            if let Some(code) = grpc_status(response.headers()) {
                span.set_attribute(KeyValue::new("rpc.grpc.status_code", code as i64));
                if code != 0 {
                    span.set_status(Status::error(format!("grpc-status {}", code)));
                }
            }
        }
        Err(e) => {
            span.add_event("error", vec![KeyValue::new("err", e.to_string())]);
            span.set_status(Status::error(e.to_string()));
        }
    }
    span.end();
}

/// `grpc-status` of a trailers-only response
fn grpc_status(headers: &HeaderMap) -> Option<i32> {
    headers
        .get(GRPC_STATUS)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

/// Client side: one Client span per call, injected into the request headers
#[derive(Debug, Clone, Copy)]
pub struct ClientTraceLayer {
    enabled: bool,
}

impl ClientTraceLayer {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Default for ClientTraceLayer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl<S> Layer<S> for ClientTraceLayer {
    type Service = ClientTraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ClientTraceService {
            inner,
            enabled: self.enabled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientTraceService<S> {
    inner: S,
    enabled: bool,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ClientTraceService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: fmt::Display,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        if !self.enabled {
            return Box::pin(self.inner.call(request));
        }

        let cx = start_span(request.uri().path(), SpanKind::Client, &Context::current());
        global::get_text_map_propagator(|propagator| {
            propagator.inject_context(&cx, &mut HeaderInjector(request.headers_mut()))
        });

        let future = self.inner.call(request);
        Box::pin(async move {
            let result = future.await;
            finish_span(&cx, &result);
            result
        })
    }
}

/// Server side: extracts the caller's context and runs the handler inside a
/// Server span
#[derive(Debug, Clone, Copy)]
pub struct ServerTraceLayer {
    enabled: bool,
}

impl ServerTraceLayer {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Default for ServerTraceLayer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl<S> Layer<S> for ServerTraceLayer {
    type Service = ServerTraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ServerTraceService {
            inner,
            enabled: self.enabled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerTraceService<S> {
    inner: S,
    enabled: bool,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ServerTraceService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: fmt::Display,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        if !self.enabled {
            return Box::pin(self.inner.call(request));
        }

        let parent = global::get_text_map_propagator(|propagator| {
            propagator.extract(&HeaderExtractor(request.headers()))
        });
        let cx = start_span(request.uri().path(), SpanKind::Server, &parent);

        let future = {
            let _guard = cx.clone().attach();
            self.inner.call(request)
        };
        Box::pin(async move {
            let result = future.with_context(cx.clone()).await;
            finish_span(&cx, &result);
            result
        })
    }
}
