//! # Stratus
//!
//! RPC dispatch and real-time hub messaging, with rkyv-encoded arguments.
//!
//! Stratus sits between a bidirectional streaming transport and your code:
//! - **Services**: unary, server streaming, client streaming and duplex
//!   methods, registered with typed Rust functions
//! - **Hubs**: long-lived connections carrying many method calls, with
//!   ordered per-connection delivery, groups and broadcast
//! - **Filters**: ordered middleware at service, method and server level
//! - **Positional encoding**: methods take up to 20 parameters, encoded as
//!   a lenient positional array
//!
//! ## Quick Start
//!
//! ```rust
//! use stratus::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Server::builder()
//!     .service(ServiceBuilder::new("Calculator").unary(
//!         "Add",
//!         |_ctx: Context, (a, b): (i32, i32)| async move { Ok::<_, MethodError>(a + b) },
//!     ))
//!     .build()?;
//!
//! let request = (2i32, 3i32).encode_payload()?.unwrap_or_default();
//! let response = server
//!     .unary("Calculator", "Add", request, Metadata::new())
//!     .await?;
//! assert_eq!(decode_response::<i32>(Some(&response[..]))?, 5);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `tracing` (default) - `TracingFilter` for per-call spans
//!
//! ## Architecture
//!
//! - [`stratus-core`] - Errors, contexts, descriptors and stream traits
//! - [`stratus-codec`] - Positional wire format and argument encoding
//! - [`stratus-middleware`] - Filters and filter chains
//! - [`stratus-server`] - Method handlers, services and dispatch
//! - [`stratus-hub`] - Streaming hubs, groups and broadcast

// Re-export core types
pub use stratus_core::{
    Attributes, BoxError, CallContext, CodecError, ConnectionId, Context, Metadata, MethodDescriptor,
    MethodError, MethodKind, MethodSignature, Nil, RegistrationError, Status, StatusCode, StratusError,
    TransportError, method_id,
};

// Re-export stream and hub message types
pub use stratus_core::{
    BoxFuture, InboundMessage, MemoryPeer, OutboundMessage, StreamHandle, StreamReceiver, StreamSender,
};

// Re-export codec
pub use stratus_codec::{ArgumentTupleCodec, Element, MethodArgs, decode_response, encode_response, hub};

// Re-export middleware
pub use stratus_middleware::{Dependencies, Filter, FilterChain, FilterDescriptor, FilterResult, Next};

#[cfg(feature = "tracing")]
pub use stratus_middleware::TracingFilter;

// Re-export server
pub use stratus_server::{
    MethodHandler, MethodOptions, RequestReader, ResponseWriter, Server, ServerBuilder, ServerOptions,
    ServiceBuilder,
};

// Re-export hubs
pub use stratus_hub::{
    Group, GroupRepository, GroupRepositoryFactory, HubBuilder, HubContext, HubOptions,
    InMemoryGroupRepositoryFactory, QueuedResponseWriter,
};

// Re-export rkyv for user convenience
pub use rkyv::{Archive, Deserialize, Serialize};

// Payload buffers
pub use ntex_bytes::Bytes;

/// Prelude module for convenient imports.
///
/// ```rust
/// use stratus::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Archive, Context, Deserialize, Element, HubBuilder, HubContext, Metadata, MethodArgs,
        MethodError, Nil, Serialize, Server, ServiceBuilder, Status, decode_response,
    };
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
