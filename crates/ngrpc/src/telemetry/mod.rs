//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! Distributed tracing for gRPC calls
//!
//! Spans are created through the global OpenTelemetry tracer and context
//! travels in request metadata using the global text-map propagator. With no
//! tracer provider installed the layers only forward the caller's context.

mod carriers;
mod layers;

pub use carriers::{HeaderExtractor, HeaderInjector, MetadataExtractor, MetadataInjector};
pub use layers::{ClientTraceLayer, ClientTraceService, ServerTraceLayer, ServerTraceService};

use opentelemetry::{global, Context};
use opentelemetry_sdk::propagation::TraceContextPropagator;

/// Instrumentation scope of ngrpc spans
pub const TRACER_NAME: &str = "ngrpc";

/// Span attribute naming the instrumented component
pub const COMPONENT: &str = "component";

pub const COMPONENT_VALUE: &str = "gRPC";

/// Install the W3C trace-context propagator globally
pub fn install_propagator() {
    global::set_text_map_propagator(TraceContextPropagator::new());
}

/// Write the current context into a request's metadata
pub fn inject_context<T>(request: &mut tonic::Request<T>) {
    let cx = Context::current();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&cx, &mut MetadataInjector(request.metadata_mut()))
    });
}

/// Read the caller's context from a request's metadata
pub fn extract_context<T>(request: &tonic::Request<T>) -> Context {
    global::get_text_map_propagator(|propagator| {
        propagator.extract(&MetadataExtractor(request.metadata()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};

    #[test]
    fn test_inject_then_extract_keeps_trace() {
        install_propagator();
        let trace_id = TraceId::from_hex("0af7651916cd43dd8448eb211c80319c").unwrap();
        let parent = Context::new().with_remote_span_context(SpanContext::new(
            trace_id,
            SpanId::from_hex("b7ad6b7169203331").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        ));

        let mut request = tonic::Request::new(());
        {
            let _guard = parent.attach();
            inject_context(&mut request);
        }
        assert!(request.metadata().get("traceparent").is_some());

        let extracted = extract_context(&request);
        assert_eq!(extracted.span().span_context().trace_id(), trace_id);
        assert!(extracted.span().span_context().is_remote());
    }

    #[test]
    fn test_extract_without_metadata_is_empty() {
        install_propagator();
        let cx = extract_context(&tonic::Request::new(()));
        assert!(!cx.span().span_context().is_valid());
    }
}
