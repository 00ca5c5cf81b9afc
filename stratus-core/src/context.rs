//! Per-call contexts.
//!
//! [`Context`] is the cheap, clonable view handed to user code.
//! [`CallContext`] is the mutable state a method handler and its filters
//! work on while a single call is in flight.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use ntex_bytes::Bytes;

use crate::descriptor::MethodKind;
use crate::error::Status;
use crate::transport::StreamHandle;

/// Global request ID counter for unique IDs.
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Global connection ID counter.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
fn next_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Identifier of one streaming connection, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh connection id.
    #[must_use]
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Create from a raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Metadata key-value pairs sent alongside a call (headers).
pub type Metadata = HashMap<String, String>;

/// Static key-value attributes attached to a method at registration.
///
/// Filters use these to make decisions without knowing the method
/// (e.g. a `"role"` attribute read by an authorization filter).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(HashMap<String, String>);

impl Attributes {
    /// Create an empty attribute set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert an attribute, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up an attribute.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Merge `other` on top of `self`; keys in `other` win.
    #[must_use]
    pub fn merged(&self, other: &Attributes) -> Self {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(merged)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-call key/value store shared by every clone of a [`Context`].
///
/// Filters put values here for the method body (or later filters) to read.
#[derive(Clone, Default)]
pub struct Items(Arc<DashMap<String, Arc<dyn Any + Send + Sync>>>);

impl Items {
    /// Store a value under `key`.
    pub fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.0.insert(key.into(), Arc::new(value));
    }

    /// Fetch a value, if present and of type `T`.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.0.get(key)?.value().clone();
        value.downcast::<T>().ok()
    }

    /// Remove a value.
    pub fn remove(&self, key: &str) -> bool {
        self.0.remove(key).is_some()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Items {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.0.iter().map(|e| e.key().clone()))
            .finish()
    }
}

/// Request context visible to user code.
///
/// Cloning is cheap: names, metadata and attributes are shared, and all
/// clones see the same [`Items`].
#[derive(Debug, Clone)]
pub struct Context {
    /// Unique identifier for this call.
    pub request_id: u64,

    /// Streaming connection this call belongs to, if any.
    pub connection_id: Option<ConnectionId>,

    /// Service (or hub) name.
    pub service: Arc<str>,

    /// Method name.
    pub method: Arc<str>,

    /// Call shape.
    pub kind: MethodKind,

    /// Wall-clock time the call started.
    pub timestamp: SystemTime,

    started: Instant,
    metadata: Arc<Metadata>,
    attributes: Arc<Attributes>,
    items: Items,
}

impl Context {
    /// Create a context for a call to `service.method`.
    #[must_use]
    pub fn new(service: impl Into<Arc<str>>, method: impl Into<Arc<str>>, kind: MethodKind) -> Self {
        Self {
            request_id: next_request_id(),
            connection_id: None,
            service: service.into(),
            method: method.into(),
            kind,
            timestamp: SystemTime::now(),
            started: Instant::now(),
            metadata: Arc::new(Metadata::new()),
            attributes: Arc::new(Attributes::new()),
            items: Items::default(),
        }
    }

    /// Replace the request metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Arc::new(metadata);
        self
    }

    /// Add one metadata entry.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.metadata).insert(key.into(), value.into());
        self
    }

    /// Attach the method's static attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Arc<Attributes>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Tag this call with its streaming connection.
    #[must_use]
    pub fn with_connection(mut self, connection_id: ConnectionId) -> Self {
        self.connection_id = Some(connection_id);
        self
    }

    /// Derive the context of a call nested inside this one (a hub method
    /// invoked over this connection). Metadata and connection carry over;
    /// the request id, method, timestamps and items are fresh.
    #[must_use]
    pub fn child(&self, method: impl Into<Arc<str>>, kind: MethodKind) -> Self {
        Self {
            request_id: next_request_id(),
            connection_id: self.connection_id,
            service: self.service.clone(),
            method: method.into(),
            kind,
            timestamp: SystemTime::now(),
            started: Instant::now(),
            metadata: self.metadata.clone(),
            attributes: Arc::new(Attributes::new()),
            items: Items::default(),
        }
    }

    /// Get a metadata value.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Look up a static attribute of the called method.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key)
    }

    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Per-call key/value storage.
    #[must_use]
    pub fn items(&self) -> &Items {
        &self.items
    }

    /// Time since the call started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Type-keyed storage for framework-provided values (e.g. the hub
/// connection a call arrived on).
#[derive(Default)]
pub struct Extensions(HashMap<TypeId, Box<dyn Any + Send + Sync>>);

impl Extensions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous one of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.0
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|prev| prev.downcast::<T>().ok().map(|b| *b))
    }

    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.get(&TypeId::of::<T>())?.downcast_ref::<T>()
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.0
            .remove(&TypeId::of::<T>())
            .and_then(|b| b.downcast::<T>().ok().map(|b| *b))
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions").field("len", &self.0.len()).finish()
    }
}

/// Mutable state of one in-flight call.
///
/// Built by the dispatcher, threaded through the filter chain into the
/// method body, and read back once the chain completes.
pub struct CallContext {
    context: Context,
    request: Bytes,
    response: Option<Bytes>,
    status: Option<Status>,
    extensions: Extensions,
    stream: Option<StreamHandle>,
}

impl CallContext {
    /// Create a call context carrying the raw request payload.
    #[must_use]
    pub fn new(context: Context, request: Bytes) -> Self {
        Self {
            context,
            request,
            response: None,
            status: None,
            extensions: Extensions::new(),
            stream: None,
        }
    }

    /// Attach the stream of a streaming call.
    #[must_use]
    pub fn with_stream(mut self, stream: StreamHandle) -> Self {
        self.stream = Some(stream);
        self
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Raw request bytes.
    #[must_use]
    pub fn request(&self) -> &Bytes {
        &self.request
    }

    /// Raw response bytes, once the body has produced them.
    #[must_use]
    pub fn response(&self) -> Option<&Bytes> {
        self.response.as_ref()
    }

    pub fn set_response(&mut self, response: Bytes) {
        self.response = Some(response);
    }

    pub fn take_response(&mut self) -> Option<Bytes> {
        self.response.take()
    }

    /// Final status, if anything other than OK was recorded.
    #[must_use]
    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = Some(status);
    }

    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Take the call's stream. Streaming bodies call this exactly once.
    pub fn take_stream(&mut self) -> Option<StreamHandle> {
        self.stream.take()
    }

    #[must_use]
    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Consume the context, returning the response or the recorded status.
    pub fn into_result(self) -> Result<Option<Bytes>, Status> {
        match self.status {
            Some(status) => Err(status),
            None => Ok(self.response),
        }
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("context", &self.context)
            .field("request_len", &self.request.len())
            .field("status", &self.status)
            .field("has_stream", &self.stream.is_some())
            .finish()
    }
}
