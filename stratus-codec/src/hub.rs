//! Hub message encoding.
//!
//! Every hub message is one positional array; the element count tells the
//! message kind apart.
//!
//! ```text
//! client -> server
//!   [MethodId, Payload]                                   fire-and-forget
//!   [MessageId, MethodId, Payload]                        request
//!   [0, ClientResultId, MethodId, Body]                   client result
//!   [1, ClientResultId, MethodId, [Code, Detail, Msg]]    client result error
//!   [127, Sequence, ServerSentAt, nil]                    server heartbeat ack
//!   [126, Sequence, ClientSentAt, Extra]                  client heartbeat
//!
//! server -> client
//!   [MethodId, Payload]                                   broadcast / push
//!   [MessageId, MethodId, Payload]                        response
//!   [-1, 0, nil]                                          connection marker
//!   [MessageId, StatusCode, Detail, Message]              error response
//!   [0, nil, ClientResultId, MethodId, Args]              client invocation
//!   [127, Sequence, ServerSentAt, nil, Metadata]          server heartbeat
//!   [126, Sequence, ClientSentAt, nil, Extra]             client heartbeat echo
//! ```

use ntex_bytes::Bytes;

use stratus_core::{
    ClientResult, ClientResultError, CodecError, HubRequest, InboundMessage, MARKER_MESSAGE_ID,
    OutboundMessage, Status, StatusCode,
};

use crate::wire::{WireReader, WireWriter};

const CLIENT_RESULT_OK: i32 = 0;
const CLIENT_RESULT_ERROR: i32 = 1;
const CLIENT_INVOKE: i32 = 0;
const CLIENT_HEARTBEAT: i32 = 0x7e;
const SERVER_HEARTBEAT: i32 = 0x7f;

#[inline]
fn capacity(payload: Option<&[u8]>) -> usize {
    32 + payload.map_or(0, <[u8]>::len)
}

/// `[MessageId, MethodId, Payload]`
#[must_use]
pub fn response_message(message_id: i32, method_id: i32, payload: Option<&[u8]>) -> Bytes {
    let mut writer = WireWriter::with_capacity(3, capacity(payload));
    writer.i32(message_id).i32(method_id).optional(payload);
    writer.finish()
}

/// `[MessageId, StatusCode, Detail, Message]`
#[must_use]
pub fn error_message(message_id: i32, status: &Status, message: Option<&str>) -> Bytes {
    let mut writer = WireWriter::with_capacity(4, 32 + status.detail.len());
    writer
        .i32(message_id)
        .i32(status.code.as_i32())
        .str(&status.detail)
        .optional(message.map(str::as_bytes));
    writer.finish()
}

/// `[MethodId, Payload]`
#[must_use]
pub fn broadcast_message(method_id: i32, payload: Option<&[u8]>) -> Bytes {
    let mut writer = WireWriter::with_capacity(2, capacity(payload));
    writer.i32(method_id).optional(payload);
    writer.finish()
}

/// `[0, nil, ClientResultId, MethodId, Args]`
#[must_use]
pub fn client_invoke_message(id: u64, method_id: i32, payload: Option<&[u8]>) -> Bytes {
    let mut writer = WireWriter::with_capacity(5, capacity(payload));
    writer
        .i32(CLIENT_INVOKE)
        .nil()
        .u64(id)
        .i32(method_id)
        .optional(payload);
    writer.finish()
}

/// `[-1, 0, nil]`
#[must_use]
pub fn marker_message() -> Bytes {
    response_message(MARKER_MESSAGE_ID, 0, None)
}

/// `[127, Sequence, ServerSentAt, nil, Metadata]`
#[must_use]
pub fn heartbeat_message(sequence: i32, sent_at: u64, metadata: Option<&[u8]>) -> Bytes {
    let mut writer = WireWriter::with_capacity(5, capacity(metadata));
    writer
        .i32(SERVER_HEARTBEAT)
        .i32(sequence)
        .u64(sent_at)
        .nil()
        .optional(metadata);
    writer.finish()
}

/// `[126, Sequence, ClientSentAt, nil, Extra]`
#[must_use]
pub fn client_heartbeat_response_message(sequence: i32, sent_at: u64, extra: Option<&[u8]>) -> Bytes {
    let mut writer = WireWriter::with_capacity(5, capacity(extra));
    writer
        .i32(CLIENT_HEARTBEAT)
        .i32(sequence)
        .u64(sent_at)
        .nil()
        .optional(extra);
    writer.finish()
}

/// Client side: `[MessageId, MethodId, Payload]`.
#[must_use]
pub fn request_message(message_id: i32, method_id: i32, payload: Option<&[u8]>) -> Bytes {
    response_message(message_id, method_id, payload)
}

/// Client side: `[MethodId, Payload]`.
#[must_use]
pub fn fire_and_forget_message(method_id: i32, payload: Option<&[u8]>) -> Bytes {
    broadcast_message(method_id, payload)
}

/// Client side: `[0, ClientResultId, MethodId, Body]`.
#[must_use]
pub fn client_result_message(id: u64, method_id: i32, body: Option<&[u8]>) -> Bytes {
    let mut writer = WireWriter::with_capacity(4, capacity(body));
    writer.i32(CLIENT_RESULT_OK).u64(id).i32(method_id).optional(body);
    writer.finish()
}

/// Client side: `[1, ClientResultId, MethodId, [StatusCode, Detail, Message]]`.
#[must_use]
pub fn client_error_message(id: u64, method_id: i32, error: &ClientResultError) -> Bytes {
    let mut inner = WireWriter::array(3);
    inner
        .i32(error.status.code.as_i32())
        .str(&error.status.detail)
        .optional(error.message.as_deref().map(str::as_bytes));
    let inner = inner.finish();

    let mut writer = WireWriter::with_capacity(4, capacity(Some(&inner[..])));
    writer
        .i32(CLIENT_RESULT_ERROR)
        .u64(id)
        .i32(method_id)
        .raw(&inner);
    writer.finish()
}

/// Client side: `[127, Sequence, ServerSentAt, nil]`.
#[must_use]
pub fn heartbeat_ack_message(sequence: i32, sent_at: u64) -> Bytes {
    let mut writer = WireWriter::with_capacity(4, 32);
    writer.i32(SERVER_HEARTBEAT).i32(sequence).u64(sent_at).nil();
    writer.finish()
}

/// Client side: `[126, Sequence, ClientSentAt, Extra]`.
#[must_use]
pub fn client_heartbeat_message(sequence: i32, sent_at: u64, extra: Option<&[u8]>) -> Bytes {
    let mut writer = WireWriter::with_capacity(4, capacity(extra));
    writer
        .i32(CLIENT_HEARTBEAT)
        .i32(sequence)
        .u64(sent_at)
        .optional(extra);
    writer.finish()
}

/// Decode a message sent by a client.
pub fn decode_inbound(bytes: &[u8]) -> Result<InboundMessage, CodecError> {
    let mut reader = WireReader::new(bytes)?;
    match reader.len() {
        2 => Ok(InboundMessage::Request(HubRequest {
            message_id: None,
            method_id: reader.i32()?,
            payload: reader.bytes()?,
        })),
        3 => Ok(InboundMessage::Request(HubRequest {
            message_id: Some(reader.i32()?),
            method_id: reader.i32()?,
            payload: reader.bytes()?,
        })),
        4 => {
            let kind = reader.i32()?;
            match kind {
                SERVER_HEARTBEAT => {
                    return Ok(InboundMessage::HeartbeatAck {
                        sequence: reader.i32()?,
                    });
                }
                CLIENT_HEARTBEAT => {
                    return Ok(InboundMessage::ClientHeartbeat {
                        sequence: reader.i32()?,
                        sent_at: reader.u64()?,
                        extra: reader.bytes()?,
                    });
                }
                _ => {}
            }
            let id = reader.u64()?;
            let method_id = reader.i32()?;
            let outcome = match kind {
                CLIENT_RESULT_OK => Ok(reader.bytes()?),
                CLIENT_RESULT_ERROR => Err(decode_client_error(reader.required()?)?),
                other => {
                    return Err(CodecError::InvalidMessage(format!(
                        "unknown client result type {other}"
                    )));
                }
            };
            Ok(InboundMessage::ClientResult(ClientResult {
                id,
                method_id,
                outcome,
            }))
        }
        n => Err(CodecError::InvalidMessage(format!(
            "unexpected hub message with {n} elements"
        ))),
    }
}

fn decode_client_error(bytes: &[u8]) -> Result<ClientResultError, CodecError> {
    let mut reader = WireReader::new(bytes)?;
    let code = StatusCode::from_i32(reader.i32()?);
    let detail = reader.string()?.unwrap_or_default();
    let message = if reader.remaining() > 0 {
        reader.string()?
    } else {
        None
    };
    Ok(ClientResultError {
        status: Status::new(code, detail),
        message,
    })
}

/// Decode a message sent by the server.
pub fn decode_outbound(bytes: &[u8]) -> Result<OutboundMessage, CodecError> {
    let mut reader = WireReader::new(bytes)?;
    match reader.len() {
        2 => Ok(OutboundMessage::Broadcast {
            method_id: reader.i32()?,
            payload: reader.bytes()?,
        }),
        3 => {
            let message_id = reader.i32()?;
            if message_id == MARKER_MESSAGE_ID {
                return Ok(OutboundMessage::Marker);
            }
            Ok(OutboundMessage::Response {
                message_id,
                method_id: reader.i32()?,
                payload: reader.bytes()?,
            })
        }
        4 => Ok(OutboundMessage::Error {
            message_id: reader.i32()?,
            status: Status::new(
                StatusCode::from_i32(reader.i32()?),
                reader.string()?.unwrap_or_default(),
            ),
            message: reader.string()?,
        }),
        5 => match reader.i32()? {
            CLIENT_INVOKE => {
                reader.skip()?;
                Ok(OutboundMessage::ClientInvoke {
                    id: reader.u64()?,
                    method_id: reader.i32()?,
                    payload: reader.bytes()?,
                })
            }
            SERVER_HEARTBEAT => {
                let sequence = reader.i32()?;
                let sent_at = reader.u64()?;
                reader.skip()?;
                Ok(OutboundMessage::Heartbeat {
                    sequence,
                    sent_at,
                    metadata: reader.bytes()?,
                })
            }
            CLIENT_HEARTBEAT => {
                let sequence = reader.i32()?;
                let sent_at = reader.u64()?;
                reader.skip()?;
                Ok(OutboundMessage::ClientHeartbeatResponse {
                    sequence,
                    sent_at,
                    extra: reader.bytes()?,
                })
            }
            other => Err(CodecError::InvalidMessage(format!(
                "unknown server message type {other}"
            ))),
        },
        n => Err(CodecError::InvalidMessage(format!(
            "unexpected hub message with {n} elements"
        ))),
    }
}
