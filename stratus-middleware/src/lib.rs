//! # stratus-middleware
//!
//! Filters for the Stratus framework.
//!
//! This crate provides:
//! - `Filter` trait for wrapping method invocations
//! - `FilterDescriptor` for ordered, shared or factory-built filters
//! - `Dependencies` container handed to filter factories
//! - `FilterChain` composition
//! - `TracingFilter` for per-call spans (with `tracing` feature)

mod filter;

#[cfg(feature = "tracing")]
mod tracing_filter;

pub use filter::{Dependencies, Filter, FilterChain, FilterDescriptor, FilterResult, MethodBody, Next};

#[cfg(feature = "tracing")]
pub use tracing_filter::{ContextSpanExt, TracingFilter};
