//! # stratus-hub
//!
//! Streaming hubs for Stratus: long-lived duplex connections carrying many
//! hub method calls, server pushes and server-to-client calls.
//!
//! This crate provides:
//! - `HubBuilder` for registering hub methods, filters and lifecycle hooks
//! - `HubContext`, the connection handle given to hub methods
//! - `QueuedResponseWriter` for ordered, non-blocking outbound writes
//! - `Group` / `GroupRepository` for named connection groups and broadcast
//! - `PendingClientResults` for correlating client results
//! - optional server heartbeats that close unresponsive connections
//!
//! A built hub registers on a `ServerBuilder` like any service and is
//! served through its `Connect` duplex method.

mod client_result;
mod connection;
mod context;
mod definition;
mod dispatcher;
mod group;
mod heartbeat;
mod writer;

pub use client_result::{ClientResultOutcome, PendingClientResults};
pub use connection::{ConnectionState, HubConnection, StreamingCallContext};
pub use context::HubContext;
pub use definition::{CONNECT_METHOD, Hook, HubBuilder, HubDefinition, HubMethodBody, HubOptions};
pub use group::{
    Group, GroupMember, GroupRepository, GroupRepositoryFactory, InMemoryGroup,
    InMemoryGroupRepository, InMemoryGroupRepositoryFactory, broadcast_except, broadcast_only,
    broadcast_to,
};
pub use writer::{QueuedResponseWriter, WriterState};
