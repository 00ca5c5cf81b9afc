//! The bound, filter-wrapped invocation unit of one method.

use std::fmt;
use std::sync::Arc;

use ntex_bytes::Bytes;
use stratus_core::{Attributes, CallContext, Context, Metadata, MethodDescriptor, MethodError, Status};
use stratus_middleware::{FilterChain, MethodBody};

use crate::options::ServerOptions;
use crate::status::format_error_detail;

/// One registered method: descriptor, attributes, composed filters and body.
///
/// Built once at startup and shared by every call to the method.
pub struct MethodHandler {
    descriptor: Arc<MethodDescriptor>,
    attributes: Arc<Attributes>,
    chain: FilterChain,
    body: Arc<dyn MethodBody>,
    return_error_detail: bool,
    max_error_detail_len: usize,
}

impl MethodHandler {
    #[must_use]
    pub fn new(
        descriptor: MethodDescriptor,
        attributes: Attributes,
        chain: FilterChain,
        body: Arc<dyn MethodBody>,
        options: &ServerOptions,
    ) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            attributes: Arc::new(attributes),
            chain,
            body,
            return_error_detail: options.return_error_detail,
            max_error_detail_len: options.max_error_detail_len,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &Arc<MethodDescriptor> {
        &self.descriptor
    }

    #[must_use]
    pub fn attributes(&self) -> &Arc<Attributes> {
        &self.attributes
    }

    #[must_use]
    pub fn filter_count(&self) -> usize {
        self.chain.len()
    }

    /// Fresh context for a call to this method.
    #[must_use]
    pub fn context(&self, metadata: Metadata) -> Context {
        Context::new(
            self.descriptor.service.clone(),
            self.descriptor.method.clone(),
            self.descriptor.kind,
        )
        .with_metadata(metadata)
        .with_attributes(self.attributes.clone())
    }

    /// Fresh call context for a call to this method.
    #[must_use]
    pub fn call_context(&self, metadata: Metadata, request: Bytes) -> CallContext {
        CallContext::new(self.context(metadata), request)
    }

    /// Run the filter chain and body without mapping the outcome.
    pub async fn invoke_raw(&self, ctx: &mut CallContext) -> Result<(), MethodError> {
        self.chain.run(self.body.as_ref(), ctx).await
    }

    /// Run the filter chain and body.
    ///
    /// A declared status is recorded on `ctx` and `Ok` is returned. An
    /// unhandled error is returned as-is, unless the server returns error
    /// details, in which case it is recorded as an `Unknown` status.
    pub async fn invoke(&self, ctx: &mut CallContext) -> Result<(), MethodError> {
        tracing::debug!(
            method = %self.descriptor.path(),
            request_id = ctx.context().request_id,
            "method begin"
        );

        let result = self.invoke_raw(ctx).await;
        let elapsed = ctx.context().elapsed();

        let result = match result {
            Ok(()) => Ok(()),
            Err(MethodError::Status(status)) => {
                ctx.set_status(status);
                Ok(())
            }
            Err(MethodError::Unhandled(error)) => {
                tracing::error!(
                    method = %self.descriptor.path(),
                    request_id = ctx.context().request_id,
                    error = %error,
                    "unhandled error in method"
                );
                if self.return_error_detail {
                    let detail = format_error_detail(&*error, self.max_error_detail_len);
                    ctx.set_status(Status::unknown(detail));
                    Ok(())
                } else {
                    Err(MethodError::Unhandled(error))
                }
            }
        };

        tracing::debug!(
            method = %self.descriptor.path(),
            elapsed_us = elapsed.as_micros() as u64,
            ok = result.is_ok() && ctx.status().is_none(),
            "method end"
        );
        result
    }
}

impl fmt::Debug for MethodHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodHandler")
            .field("method", &self.descriptor.path())
            .field("kind", &self.descriptor.kind)
            .field("filters", &self.chain.len())
            .finish()
    }
}
