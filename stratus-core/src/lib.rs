//! # stratus-core
//!
//! Core types, traits, and error definitions for the Stratus framework.
//!
//! This crate provides:
//! - Error and status types (`Status`, `MethodError`, `RegistrationError`, `StratusError`)
//! - Call contexts (`Context`, `CallContext`)
//! - Method signatures, descriptors and the resolver that maps one to the other
//! - Stable hub method ids (`method_id`)
//! - Stream trait definitions and an in-memory stream
//! - Hub message types

mod context;
mod descriptor;
mod error;
mod message;
mod transport;

pub use context::{Attributes, CallContext, ConnectionId, Context, Extensions, Items, Metadata};
pub use descriptor::{
    MAX_ARGUMENTS, MethodDescriptor, MethodKind, MethodSignature, RequestShape, ResponseShape,
    ReturnType, ReturnWrapper, ValueType, method_id, resolve_hub_method, resolve_service_method,
};
pub use error::{
    BoxError, CodecError, MethodError, RegistrationError, Status, StatusCode, StratusError,
    TransportError,
};
pub use message::{
    ArchivedNil, ClientResult, ClientResultError, HubRequest, InboundMessage, MARKER_MESSAGE_ID,
    Nil, OutboundMessage,
};
pub use transport::{BoxFuture, MemoryPeer, StreamHandle, StreamReceiver, StreamSender};
