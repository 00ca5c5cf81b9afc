//! # stratus-server
//!
//! Method handlers, service registration and dispatch for Stratus.
//!
//! This crate provides:
//! - `ServiceBuilder` for registering typed unary and streaming methods
//! - `MethodHandler`, the filter-wrapped invocation unit built per method
//! - `ServerBuilder` / `Server` for building handlers and dispatching calls
//! - `ServerOptions` for error detail and global filters

mod adapter;
mod handler;
mod options;
mod registry;
mod service;
mod status;

pub use adapter::{
    ClientStreamingBody, DuplexStreamingBody, RequestReader, ResponseWriter, ServerStreamingBody,
    UnaryBody,
};
pub use handler::MethodHandler;
pub use options::ServerOptions;
pub use registry::{Server, ServerBuilder, UNHANDLED_ERROR_DETAIL};
pub use service::{BuildEnv, IntoService, MethodOptions, ServiceBuilder, ServiceDefinition};
pub use status::{OMITTED_MARKER, format_error_detail};
