//! Method registry and dispatch.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ntex_bytes::Bytes;
use stratus_core::{Metadata, MethodError, MethodKind, RegistrationError, Status, StreamHandle};
use stratus_middleware::Dependencies;

use crate::handler::MethodHandler;
use crate::options::ServerOptions;
use crate::service::{BuildEnv, IntoService};

/// Detail sent to callers when a method fails without a declared status.
pub const UNHANDLED_ERROR_DETAIL: &str = "Exception was thrown by handler.";

/// Builder collecting services, options and filter dependencies.
pub struct ServerBuilder {
    options: ServerOptions,
    dependencies: Dependencies,
    services: Vec<Box<dyn IntoService>>,
}

impl ServerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: ServerOptions::default(),
            dependencies: Dependencies::new(),
            services: Vec::new(),
        }
    }

    #[must_use]
    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// Make a value available to filter factories.
    #[must_use]
    pub fn dependency<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.dependencies.insert(Arc::new(value));
        self
    }

    #[must_use]
    pub fn dependencies(mut self, dependencies: Dependencies) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Register a service or hub.
    #[must_use]
    pub fn service(mut self, service: impl IntoService) -> Self {
        self.services.push(Box::new(service));
        self
    }

    /// Resolve every method and build its handler.
    ///
    /// Fails on the first invalid signature, filter that cannot be
    /// constructed, or (service, method) key registered twice.
    pub fn build(self) -> Result<Server, RegistrationError> {
        let env = BuildEnv {
            options: &self.options,
            dependencies: &self.dependencies,
        };

        let mut handlers: HandlerMap = HashMap::new();
        let mut count = 0;
        for service in self.services {
            let definition = service.build(&env)?;
            for handler in definition.handlers {
                let descriptor = handler.descriptor().clone();
                let methods = handlers.entry(descriptor.service.clone()).or_default();
                if methods.insert(descriptor.method.clone(), Arc::new(handler)).is_some() {
                    return Err(RegistrationError::DuplicateRegistration {
                        service: descriptor.service.to_string(),
                        method: descriptor.method.to_string(),
                    });
                }
                count += 1;
            }
        }

        tracing::debug!(services = handlers.len(), handlers = count, "server built");
        Ok(Server {
            handlers,
            count,
            options: Arc::new(self.options),
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("options", &self.options)
            .field("services", &self.services.len())
            .finish()
    }
}

type HandlerMap = HashMap<Arc<str>, HashMap<Arc<str>, Arc<MethodHandler>>>;

/// Immutable set of method handlers, keyed by service name, then method name.
///
/// A transport calls one of the dispatch methods per incoming call.
pub struct Server {
    handlers: HandlerMap,
    count: usize,
    options: Arc<ServerOptions>,
}

impl Server {
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    #[must_use]
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Look up a handler.
    #[must_use]
    pub fn handler(&self, service: &str, method: &str) -> Option<&Arc<MethodHandler>> {
        self.handlers.get(service)?.get(method)
    }

    pub fn handlers(&self) -> impl Iterator<Item = &Arc<MethodHandler>> {
        self.handlers.values().flat_map(HashMap::values)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Dispatch a unary call. An empty response stands for "no value".
    pub async fn unary(
        &self,
        service: &str,
        method: &str,
        request: Bytes,
        metadata: Metadata,
    ) -> Result<Bytes, Status> {
        let response = self.dispatch(service, method, MethodKind::Unary, request, metadata, None).await?;
        Ok(response.unwrap_or_default())
    }

    /// Dispatch a server streaming call. Responses go to `stream.sender`.
    pub async fn server_streaming(
        &self,
        service: &str,
        method: &str,
        request: Bytes,
        metadata: Metadata,
        stream: StreamHandle,
    ) -> Result<(), Status> {
        self.dispatch(service, method, MethodKind::ServerStreaming, request, metadata, Some(stream))
            .await
            .map(drop)
    }

    /// Dispatch a client streaming call. Requests come from `stream.receiver`.
    pub async fn client_streaming(
        &self,
        service: &str,
        method: &str,
        metadata: Metadata,
        stream: StreamHandle,
    ) -> Result<Bytes, Status> {
        let response = self
            .dispatch(service, method, MethodKind::ClientStreaming, Bytes::new(), metadata, Some(stream))
            .await?;
        Ok(response.unwrap_or_default())
    }

    /// Dispatch a duplex streaming call, including hub connections.
    pub async fn duplex(
        &self,
        service: &str,
        method: &str,
        metadata: Metadata,
        stream: StreamHandle,
    ) -> Result<(), Status> {
        self.dispatch(service, method, MethodKind::DuplexStreaming, Bytes::new(), metadata, Some(stream))
            .await
            .map(drop)
    }

    async fn dispatch(
        &self,
        service: &str,
        method: &str,
        kind: MethodKind,
        request: Bytes,
        metadata: Metadata,
        stream: Option<StreamHandle>,
    ) -> Result<Option<Bytes>, Status> {
        let handler = self
            .handler(service, method)
            .filter(|handler| handler.descriptor().kind == kind)
            .ok_or_else(|| {
                tracing::debug!(service, method, %kind, "no handler for call");
                Status::unimplemented(format!("method {service}/{method} ({kind}) is not implemented"))
            })?;

        let mut ctx = handler.call_context(metadata, request);
        if let Some(stream) = stream {
            ctx = ctx.with_stream(stream);
        }

        match handler.invoke(&mut ctx).await {
            Ok(()) => ctx.into_result(),
            Err(MethodError::Status(status)) => Err(status),
            Err(MethodError::Unhandled(_)) => Err(Status::unknown(UNHANDLED_ERROR_DETAIL)),
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.handlers().map(|h| h.descriptor().path()).collect();
        methods.sort();
        f.debug_struct("Server").field("methods", &methods).finish()
    }
}
