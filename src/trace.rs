//! W3C Trace Context propagation for outgoing requests.
//!
//! When the tracing toggle is on, the interceptor chain includes a
//! [`TraceInterceptor`] that injects a `traceparent` header into every
//! outgoing request. The context comes from the current `tracing` span when
//! OpenTelemetry context is attached; otherwise a fresh root context is
//! generated so downstream services still see a coherent trace.

use opentelemetry::trace::TraceContextExt;
use rand::Rng;
use tonic::{metadata::MetadataValue, service::Interceptor};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Metadata key for the W3C traceparent header.
const TRACEPARENT_KEY: &str = "traceparent";

/// Metadata key for the W3C tracestate header.
const TRACESTATE_KEY: &str = "tracestate";

/// Tonic interceptor injecting W3C Trace Context into outgoing requests.
#[derive(Debug, Clone, Default)]
pub struct TraceInterceptor;

impl TraceInterceptor {
    /// Creates a new trace-propagation interceptor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Interceptor for TraceInterceptor {
    fn call(
        &mut self,
        mut request: tonic::Request<()>,
    ) -> std::result::Result<tonic::Request<()>, tonic::Status> {
        let (traceparent, tracestate) = match current_trace_context() {
            Some(ctx) => ctx,
            None => (fresh_traceparent(), None),
        };

        if let Ok(value) = MetadataValue::try_from(traceparent.as_str()) {
            request.metadata_mut().insert(TRACEPARENT_KEY, value);
        }
        if let Some(state) = tracestate {
            if let Ok(value) = MetadataValue::try_from(state.as_str()) {
                request.metadata_mut().insert(TRACESTATE_KEY, value);
            }
        }

        Ok(request)
    }
}

/// Extracts the trace context from the current tracing span.
///
/// Returns `None` when no span is active, the span has no OpenTelemetry
/// context attached, or the trace ID is invalid (all zeros).
fn current_trace_context() -> Option<(String, Option<String>)> {
    let current_span = tracing::Span::current();
    let otel_context = current_span.context();
    let span_ref = otel_context.span();
    let span_context = span_ref.span_context();

    if !span_context.is_valid() {
        return None;
    }

    let traceparent = format!(
        "00-{}-{}-{:02x}",
        span_context.trace_id(),
        span_context.span_id(),
        span_context.trace_flags().to_u8(),
    );

    let state_header = span_context.trace_state().header();
    let tracestate = if state_header.is_empty() { None } else { Some(state_header) };

    Some((traceparent, tracestate))
}

/// Generates a fresh sampled root traceparent.
fn fresh_traceparent() -> String {
    let mut rng = rand::rng();
    // All-zero IDs are invalid per the W3C spec.
    let trace_id: u128 = rng.random::<u128>().max(1);
    let span_id: u64 = rng.random::<u64>().max(1);
    format!("00-{trace_id:032x}-{span_id:016x}-01")
}
