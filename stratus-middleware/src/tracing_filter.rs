//! Tracing filter.

use stratus_core::{BoxFuture, CallContext, Context, MethodError};
use tracing::{Instrument, Span, info_span};

use crate::filter::{Filter, FilterResult, Next};

/// Filter that wraps each call in a tracing span.
///
/// Completion is logged at `debug` with the elapsed time. A declared status
/// is logged at `info`; anything else at `error`.
///
/// ## Example
///
/// ```rust
/// use stratus_middleware::{FilterDescriptor, TracingFilter};
///
/// let descriptor = FilterDescriptor::new(TracingFilter::new()).with_order(i32::MIN);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFilter;

impl TracingFilter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Filter for TracingFilter {
    fn invoke<'a>(&'a self, ctx: &'a mut CallContext, next: Next<'a>) -> BoxFuture<'a, FilterResult> {
        let span = ctx.context().span("call");
        Box::pin(
            async move {
                let result = next.run(&mut *ctx).await;
                let context = ctx.context();
                let elapsed = context.elapsed();
                match &result {
                    Ok(()) => tracing::debug!(elapsed_us = elapsed.as_micros() as u64, "call completed"),
                    Err(MethodError::Status(status)) => tracing::info!(
                        code = %status.code,
                        detail = %status.detail,
                        elapsed_us = elapsed.as_micros() as u64,
                        "call returned status"
                    ),
                    Err(MethodError::Unhandled(error)) => tracing::error!(
                        request_id = context.request_id,
                        error = %error,
                        "call failed"
                    ),
                }
                result
            }
            .instrument(span),
        )
    }
}

/// Extension trait for creating spans from context.
pub trait ContextSpanExt {
    /// Create a tracing span for this context.
    fn span(&self, operation: &str) -> Span;
}

impl ContextSpanExt for Context {
    fn span(&self, operation: &str) -> Span {
        let connection = self
            .connection_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".to_string());

        info_span!(
            "rpc",
            operation = operation,
            service = %self.service,
            method = %self.method,
            kind = %self.kind,
            request_id = self.request_id,
            connection = %connection,
        )
    }
}
