//! Hub registration.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use stratus_codec::{Element, MethodArgs, encode_response, is_nil};
use stratus_core::{
    Attributes, BoxFuture, CallContext, MethodError, MethodSignature, RegistrationError,
    ReturnType, ReturnWrapper, Status, ValueType, method_id, resolve_hub_method,
    resolve_service_method,
};
use stratus_middleware::{FilterChain, FilterDescriptor, FilterResult, MethodBody};
use stratus_server::{BuildEnv, IntoService, MethodHandler, MethodOptions, ServiceDefinition};

use crate::connection::HubConnection;
use crate::context::HubContext;
use crate::dispatcher;
use crate::group::{GroupRepository, GroupRepositoryFactory, InMemoryGroupRepositoryFactory};

/// Name of the duplex method a hub is exposed as.
pub const CONNECT_METHOD: &str = "Connect";

/// Per-hub connection settings.
#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Requests read ahead of the one being processed. The reader waits
    /// when the queue is full.
    pub request_queue_capacity: usize,

    /// How long teardown waits for the request being processed.
    pub shutdown_timeout: Duration,

    /// Default wait for [`HubContext::invoke_client`].
    pub client_result_timeout: Duration,

    /// Period of server heartbeats. `None` disables them.
    pub heartbeat_interval: Option<Duration>,

    /// How long an unanswered heartbeat may stay pending before the
    /// connection is closed. `None` only measures latency.
    pub heartbeat_timeout: Option<Duration>,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            request_queue_capacity: 10,
            shutdown_timeout: Duration::from_secs(1),
            client_result_timeout: Duration::from_secs(5),
            heartbeat_interval: None,
            heartbeat_timeout: None,
        }
    }
}

impl HubOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_request_queue_capacity(mut self, capacity: usize) -> Self {
        self.request_queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_client_result_timeout(mut self, timeout: Duration) -> Self {
        self.client_result_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }
}

/// A connection lifecycle hook.
pub type Hook = Arc<dyn Fn(HubContext) -> BoxFuture<'static, Result<(), MethodError>> + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub(crate) on_connecting: Option<Hook>,
    pub(crate) on_connected: Option<Hook>,
    pub(crate) on_disconnected: Option<Hook>,
}

fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn(HubContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), MethodError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Body of a hub method: `Fn(HubContext, A) -> Result<R, MethodError>`.
///
/// Only runs on a hub connection; the dispatcher puts the connection into
/// the call's extensions.
pub struct HubMethodBody<A, R, F> {
    f: F,
    defaults: A,
    _marker: PhantomData<fn() -> R>,
}

impl<A, R, F, Fut> HubMethodBody<A, R, F>
where
    A: MethodArgs,
    R: Element + Send + 'static,
    F: Fn(HubContext, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
{
    #[must_use]
    pub fn new(f: F) -> Self {
        Self {
            f,
            defaults: A::defaults(),
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn signature(name: &str) -> MethodSignature {
        let value = if is_nil::<R>() {
            ValueType::Nil
        } else {
            ValueType::named(std::any::type_name::<R>())
        };
        MethodSignature::new(name, ReturnType::new(ReturnWrapper::Task, value).asynchronous())
            .params(A::parameter_types())
    }
}

impl<A, R, F, Fut> MethodBody for HubMethodBody<A, R, F>
where
    A: MethodArgs,
    R: Element + Send + 'static,
    F: Fn(HubContext, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut CallContext) -> BoxFuture<'a, FilterResult> {
        Box::pin(async move {
            let connection = ctx
                .extensions()
                .get::<Arc<HubConnection>>()
                .cloned()
                .ok_or_else(|| Status::internal("hub method called outside a hub connection"))?;

            let request = ctx.request();
            let payload = if request.is_empty() { None } else { Some(&request[..]) };
            let args = A::decode_payload(payload, &self.defaults)?;

            let hub_ctx = HubContext::new(connection, ctx.context().clone());
            let value = (self.f)(hub_ctx, args).await?;
            if let Some(bytes) = encode_response(&value)? {
                ctx.set_response(bytes);
            }
            Ok(())
        })
    }
}

struct HubMethodEntry {
    signature: MethodSignature,
    method_id: Option<i32>,
    body: Arc<dyn MethodBody>,
    options: MethodOptions,
}

/// Builder for a streaming hub.
///
/// ## Example
///
/// ```rust
/// use stratus_core::{MethodError, Nil};
/// use stratus_hub::{HubBuilder, HubContext};
///
/// let hub = HubBuilder::new("Chat")
///     .method("Join", |ctx: HubContext, (room,): (String,)| async move {
///         ctx.join(&room);
///         Ok::<_, MethodError>(Nil)
///     })
///     .method("Say", |ctx: HubContext, (room, text): (String, String)| async move {
///         ctx.broadcast(&room, "OnMessage", &(text,))?;
///         Ok::<_, MethodError>(Nil)
///     });
/// ```
pub struct HubBuilder {
    name: String,
    filters: Vec<FilterDescriptor>,
    attributes: Attributes,
    methods: Vec<HubMethodEntry>,
    hooks: Hooks,
    group_factory: Arc<dyn GroupRepositoryFactory>,
    options: HubOptions,
}

impl HubBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filters: Vec::new(),
            attributes: Attributes::new(),
            methods: Vec::new(),
            hooks: Hooks::default(),
            group_factory: Arc::new(InMemoryGroupRepositoryFactory),
            options: HubOptions::default(),
        }
    }

    /// Add a hub-level filter, applied to every hub method.
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

    #[must_use]
    pub fn options(mut self, options: HubOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a custom group store for this hub.
    #[must_use]
    pub fn group_repository(mut self, factory: impl GroupRepositoryFactory) -> Self {
        self.group_factory = Arc::new(factory);
        self
    }

    /// Register a hub method. Its id is derived from `name`.
    #[must_use]
    pub fn method<A, R, F, Fut>(self, name: &str, f: F) -> Self
    where
        A: MethodArgs,
        R: Element + Send + 'static,
        F: Fn(HubContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
    {
        self.push(name, None, MethodOptions::default(), f)
    }

    #[must_use]
    pub fn method_with<A, R, F, Fut>(self, name: &str, options: MethodOptions, f: F) -> Self
    where
        A: MethodArgs,
        R: Element + Send + 'static,
        F: Fn(HubContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
    {
        self.push(name, None, options, f)
    }

    /// Register a hub method under an explicit id instead of the derived one.
    #[must_use]
    pub fn method_with_id<A, R, F, Fut>(self, name: &str, id: i32, options: MethodOptions, f: F) -> Self
    where
        A: MethodArgs,
        R: Element + Send + 'static,
        F: Fn(HubContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
    {
        self.push(name, Some(id), options, f)
    }

    /// Runs before the connection is established. An error rejects it.
    #[must_use]
    pub fn on_connecting<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(HubContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), MethodError>> + Send + 'static,
    {
        self.hooks.on_connecting = Some(hook(f));
        self
    }

    /// Runs once the connection marker has been queued. An error closes
    /// the connection.
    #[must_use]
    pub fn on_connected<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(HubContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), MethodError>> + Send + 'static,
    {
        self.hooks.on_connected = Some(hook(f));
        self
    }

    /// Runs during teardown, before the connection leaves its groups.
    /// Errors are logged.
    #[must_use]
    pub fn on_disconnected<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(HubContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), MethodError>> + Send + 'static,
    {
        self.hooks.on_disconnected = Some(hook(f));
        self
    }

    fn push<A, R, F, Fut>(mut self, name: &str, id: Option<i32>, options: MethodOptions, f: F) -> Self
    where
        A: MethodArgs,
        R: Element + Send + 'static,
        F: Fn(HubContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
    {
        self.methods.push(HubMethodEntry {
            signature: HubMethodBody::<A, R, F>::signature(name),
            method_id: id,
            body: Arc::new(HubMethodBody::new(f)),
            options,
        });
        self
    }
}

impl fmt::Debug for HubBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubBuilder")
            .field("name", &self.name)
            .field("methods", &self.methods.len())
            .field("filters", &self.filters.len())
            .field("options", &self.options)
            .finish()
    }
}

/// A built hub: handlers by method id plus everything a connection needs.
pub struct HubDefinition {
    name: Arc<str>,
    methods: HashMap<i32, MethodHandler>,
    pub(crate) hooks: Hooks,
    groups: Arc<dyn GroupRepository>,
    options: HubOptions,
    pub(crate) return_error_detail: bool,
    pub(crate) max_error_detail_len: usize,
}

impl HubDefinition {
    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[must_use]
    pub fn method(&self, method_id: i32) -> Option<&MethodHandler> {
        self.methods.get(&method_id)
    }

    pub fn method_ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.methods.keys().copied()
    }

    #[must_use]
    pub fn groups(&self) -> &Arc<dyn GroupRepository> {
        &self.groups
    }

    #[must_use]
    pub fn options(&self) -> &HubOptions {
        &self.options
    }
}

impl fmt::Debug for HubDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubDefinition")
            .field("name", &self.name)
            .field("methods", &self.methods.len())
            .field("options", &self.options)
            .finish()
    }
}

struct ConnectBody {
    hub: Arc<HubDefinition>,
}

impl MethodBody for ConnectBody {
    fn call<'a>(&'a self, ctx: &'a mut CallContext) -> BoxFuture<'a, FilterResult> {
        Box::pin(dispatcher::run(self.hub.clone(), ctx))
    }
}

impl HubBuilder {
    /// Resolve and build every hub method.
    pub fn build_definition(self, env: &BuildEnv<'_>) -> Result<HubDefinition, RegistrationError> {
        let mut names = HashSet::new();
        let mut ids: HashMap<i32, Arc<str>> = HashMap::new();
        let mut methods = HashMap::with_capacity(self.methods.len());

        for entry in &self.methods {
            let descriptor = resolve_hub_method(&self.name, &entry.signature)?;
            if !names.insert(descriptor.method.clone()) {
                return Err(RegistrationError::DuplicateRegistration {
                    service: self.name.clone(),
                    method: descriptor.method.to_string(),
                });
            }

            let id = entry.method_id.unwrap_or_else(|| method_id(&descriptor.method));
            if let Some(first) = ids.insert(id, descriptor.method.clone()) {
                return Err(RegistrationError::DuplicateMethodId {
                    hub: self.name.clone(),
                    method_id: id,
                    first: first.to_string(),
                    second: descriptor.method.to_string(),
                });
            }

            let filters = self
                .filters
                .iter()
                .chain(&entry.options.filters)
                .chain(&env.options.global_hub_filters);
            let chain = FilterChain::compose(filters, env.dependencies)?;
            let attributes = self.attributes.merged(&entry.options.attributes);

            tracing::debug!(hub = %self.name, method = %descriptor.method, method_id = id, "hub method registered");
            methods.insert(
                id,
                MethodHandler::new(descriptor, attributes, chain, entry.body.clone(), env.options),
            );
        }

        let groups = self.group_factory.create_repository(&self.name);
        Ok(HubDefinition {
            name: Arc::from(self.name),
            methods,
            hooks: self.hooks,
            groups,
            options: self.options,
            return_error_detail: env.options.return_error_detail,
            max_error_detail_len: env.options.max_error_detail_len,
        })
    }
}

impl IntoService for HubBuilder {
    fn build(self: Box<Self>, env: &BuildEnv<'_>) -> Result<ServiceDefinition, RegistrationError> {
        let attributes = self.attributes.clone();
        let hub = Arc::new(self.build_definition(env)?);

        let signature = MethodSignature::new(
            CONNECT_METHOD,
            ReturnType::new(ReturnWrapper::DuplexStreaming, ValueType::named("HubMessage")).asynchronous(),
        );
        let descriptor = resolve_service_method(&hub.name, &signature)?;
        let connect = MethodHandler::new(
            descriptor,
            attributes,
            FilterChain::default(),
            Arc::new(ConnectBody { hub: hub.clone() }),
            env.options,
        );

        Ok(ServiceDefinition::new(hub.name.clone(), vec![connect]))
    }
}
