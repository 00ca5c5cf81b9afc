//! Service registration.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use stratus_codec::{Element, MethodArgs};
use stratus_core::{
    Attributes, Context, MethodError, MethodSignature, RegistrationError, resolve_service_method,
};
use stratus_middleware::{Dependencies, FilterChain, FilterDescriptor, MethodBody};

use crate::adapter::{
    ClientStreamingBody, DuplexStreamingBody, RequestReader, ResponseWriter, ServerStreamingBody,
    UnaryBody,
};
use crate::handler::MethodHandler;
use crate::options::ServerOptions;

/// What a service sees while its handlers are being built.
#[derive(Debug, Clone, Copy)]
pub struct BuildEnv<'a> {
    pub options: &'a ServerOptions,
    pub dependencies: &'a Dependencies,
}

/// Anything that can be registered on a server.
pub trait IntoService: Send + 'static {
    /// Resolve and build every handler of the service.
    fn build(self: Box<Self>, env: &BuildEnv<'_>) -> Result<ServiceDefinition, RegistrationError>;
}

/// A built service: its name and one handler per method.
#[derive(Debug)]
pub struct ServiceDefinition {
    pub name: Arc<str>,
    pub handlers: Vec<MethodHandler>,
}

impl ServiceDefinition {
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, handlers: Vec<MethodHandler>) -> Self {
        Self {
            name: name.into(),
            handlers,
        }
    }
}

/// Method-level filters and attributes.
#[derive(Debug, Clone, Default)]
pub struct MethodOptions {
    pub filters: Vec<FilterDescriptor>,
    pub attributes: Attributes,
}

impl MethodOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(mut self, filter: FilterDescriptor) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key, value);
        self
    }
}

struct MethodEntry {
    signature: MethodSignature,
    body: Arc<dyn MethodBody>,
    options: MethodOptions,
}

/// Builder for a service: a named set of methods plus class-level filters
/// and attributes.
///
/// ## Example
///
/// ```rust
/// use stratus_core::{Context, MethodError};
/// use stratus_server::ServiceBuilder;
///
/// let service = ServiceBuilder::new("Calculator")
///     .unary("Add", |_ctx: Context, (a, b): (i32, i32)| async move {
///         Ok::<_, MethodError>(a + b)
///     });
/// ```
pub struct ServiceBuilder {
    name: String,
    filters: Vec<FilterDescriptor>,
    attributes: Attributes,
    methods: Vec<MethodEntry>,
}

impl ServiceBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filters: Vec::new(),
            attributes: Attributes::new(),
            methods: Vec::new(),
        }
    }

    /// Add a class-level filter, applied to every method of the service.
    #[must_use]
    pub fn filter(mut self, filter: FilterDescriptor) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add a class-level attribute.
    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key, value);
        self
    }

    /// Register a unary method.
    #[must_use]
    pub fn unary<A, R, F, Fut>(self, name: &str, f: F) -> Self
    where
        A: MethodArgs,
        R: Element + Send + 'static,
        F: Fn(Context, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
    {
        self.unary_with(name, MethodOptions::default(), f)
    }

    #[must_use]
    pub fn unary_with<A, R, F, Fut>(self, name: &str, options: MethodOptions, f: F) -> Self
    where
        A: MethodArgs,
        R: Element + Send + 'static,
        F: Fn(Context, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
    {
        let signature = UnaryBody::<A, R, F>::signature(name);
        self.push(signature, Arc::new(UnaryBody::new(f)), options)
    }

    /// Register a server streaming method.
    #[must_use]
    pub fn server_streaming<A, T, F, Fut>(self, name: &str, f: F) -> Self
    where
        A: MethodArgs,
        T: Element + 'static,
        F: Fn(Context, A, ResponseWriter<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), MethodError>> + Send + 'static,
    {
        self.server_streaming_with(name, MethodOptions::default(), f)
    }

    #[must_use]
    pub fn server_streaming_with<A, T, F, Fut>(self, name: &str, options: MethodOptions, f: F) -> Self
    where
        A: MethodArgs,
        T: Element + 'static,
        F: Fn(Context, A, ResponseWriter<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), MethodError>> + Send + 'static,
    {
        let signature = ServerStreamingBody::<A, T, F>::signature(name);
        self.push(signature, Arc::new(ServerStreamingBody::new(f)), options)
    }

    /// Register a client streaming method.
    #[must_use]
    pub fn client_streaming<T, R, F, Fut>(self, name: &str, f: F) -> Self
    where
        T: Element + 'static,
        R: Element + Send + 'static,
        F: Fn(Context, RequestReader<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
    {
        self.client_streaming_with(name, MethodOptions::default(), f)
    }

    #[must_use]
    pub fn client_streaming_with<T, R, F, Fut>(self, name: &str, options: MethodOptions, f: F) -> Self
    where
        T: Element + 'static,
        R: Element + Send + 'static,
        F: Fn(Context, RequestReader<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
    {
        let signature = ClientStreamingBody::<T, R, F>::signature(name);
        self.push(signature, Arc::new(ClientStreamingBody::new(f)), options)
    }

    /// Register a duplex streaming method.
    #[must_use]
    pub fn duplex_streaming<T, U, F, Fut>(self, name: &str, f: F) -> Self
    where
        T: Element + 'static,
        U: Element + 'static,
        F: Fn(Context, RequestReader<T>, ResponseWriter<U>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), MethodError>> + Send + 'static,
    {
        self.duplex_streaming_with(name, MethodOptions::default(), f)
    }

    #[must_use]
    pub fn duplex_streaming_with<T, U, F, Fut>(self, name: &str, options: MethodOptions, f: F) -> Self
    where
        T: Element + 'static,
        U: Element + 'static,
        F: Fn(Context, RequestReader<T>, ResponseWriter<U>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), MethodError>> + Send + 'static,
    {
        let signature = DuplexStreamingBody::<T, U, F>::signature(name);
        self.push(signature, Arc::new(DuplexStreamingBody::new(f)), options)
    }

    /// Register a method from an externally supplied signature and a
    /// hand-written body. The signature is validated at build time.
    #[must_use]
    pub fn raw(self, signature: MethodSignature, body: Arc<dyn MethodBody>, options: MethodOptions) -> Self {
        self.push(signature, body, options)
    }

    fn push(mut self, signature: MethodSignature, body: Arc<dyn MethodBody>, options: MethodOptions) -> Self {
        self.methods.push(MethodEntry {
            signature,
            body,
            options,
        });
        self
    }
}

impl IntoService for ServiceBuilder {
    fn build(self: Box<Self>, env: &BuildEnv<'_>) -> Result<ServiceDefinition, RegistrationError> {
        let mut seen = HashSet::new();
        let mut handlers = Vec::with_capacity(self.methods.len());

        for entry in &self.methods {
            let descriptor = resolve_service_method(&self.name, &entry.signature)?;
            if !seen.insert(descriptor.method.clone()) {
                return Err(RegistrationError::DuplicateRegistration {
                    service: self.name.clone(),
                    method: descriptor.method.to_string(),
                });
            }

            let filters = self
                .filters
                .iter()
                .chain(&entry.options.filters)
                .chain(&env.options.global_filters);
            let chain = FilterChain::compose(filters, env.dependencies)?;
            let attributes = self.attributes.merged(&entry.options.attributes);

            handlers.push(MethodHandler::new(
                descriptor,
                attributes,
                chain,
                entry.body.clone(),
                env.options,
            ));
        }

        Ok(ServiceDefinition::new(self.name, handlers))
    }
}

impl fmt::Debug for ServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBuilder")
            .field("name", &self.name)
            .field("methods", &self.methods.len())
            .field("filters", &self.filters.len())
            .finish()
    }
}
