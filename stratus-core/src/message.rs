//! Hub message types.
//!
//! These are the decoded forms of the positional arrays exchanged over a
//! hub connection. Encoding and decoding live in `stratus-codec`.

use ntex_bytes::Bytes;
use rkyv::{Archive, Deserialize, Serialize};

use crate::error::Status;

/// Message id of the marker the server sends once a connection is up.
pub const MARKER_MESSAGE_ID: i32 = -1;

/// Sentinel for "no value": the return type of methods that produce
/// nothing, and the encoding of an empty payload.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[rkyv(derive(Debug))]
pub struct Nil;

/// A hub method call received from a client.
#[derive(Debug, Clone, PartialEq)]
pub struct HubRequest {
    /// Correlation id echoed in the response. `None` for fire-and-forget.
    pub message_id: Option<i32>,
    pub method_id: i32,
    /// Encoded arguments; `None` when the method takes none.
    pub payload: Option<Bytes>,
}

impl HubRequest {
    /// Whether the client expects a response.
    #[must_use]
    pub fn expects_response(&self) -> bool {
        self.message_id.is_some()
    }
}

/// Error reported by a client for a server-to-client call.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientResultError {
    pub status: Status,
    pub message: Option<String>,
}

/// A client's answer to a server-to-client call.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientResult {
    pub id: u64,
    pub method_id: i32,
    pub outcome: Result<Option<Bytes>, ClientResultError>,
}

/// Anything a client may send over a hub connection.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Request(HubRequest),
    ClientResult(ClientResult),

    /// Answer to a server heartbeat.
    HeartbeatAck { sequence: i32 },

    /// Heartbeat started by the client; the server echoes it back.
    ClientHeartbeat {
        sequence: i32,
        /// Client clock in milliseconds, opaque to the server.
        sent_at: u64,
        extra: Option<Bytes>,
    },
}

/// Anything the server may send over a hub connection.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Result of a request.
    Response {
        message_id: i32,
        method_id: i32,
        payload: Option<Bytes>,
    },

    /// Failure of a request.
    Error {
        message_id: i32,
        status: Status,
        /// Error text, only present when the server returns error details.
        message: Option<String>,
    },

    /// Server push (group broadcast or direct send).
    Broadcast {
        method_id: i32,
        payload: Option<Bytes>,
    },

    /// Server-to-client call awaiting a [`ClientResult`].
    ClientInvoke {
        id: u64,
        method_id: i32,
        payload: Option<Bytes>,
    },

    /// Sent once after the connection is established.
    Marker,

    /// Periodic server heartbeat; the client answers with the same sequence.
    Heartbeat {
        sequence: i32,
        /// Unix time in milliseconds.
        sent_at: u64,
        metadata: Option<Bytes>,
    },

    /// Echo of a [`InboundMessage::ClientHeartbeat`].
    ClientHeartbeatResponse {
        sequence: i32,
        sent_at: u64,
        extra: Option<Bytes>,
    },
}
