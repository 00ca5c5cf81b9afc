//! Runs one hub connection: lifecycle hooks, the reader loop, the request
//! consumer and teardown.
//!
//! ```text
//! reader (the Connect call)      consumer task            writer task
//! ------------------------      -------------            -----------
//! recv -> decode
//!   request       -> queue  ->  handler.invoke_raw  ->  response/error
//!   client result -> complete pending call
//!   heartbeat ack -> monitor
//!   client ping   ------------------------------------>  echo
//! ```
//!
//! Requests of one connection are processed strictly one at a time, in the
//! order they were read. Every request that was read is processed, unless
//! the consumer is still busy when the shutdown timeout passes.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use stratus_codec::hub;
use stratus_core::{
    CallContext, ConnectionId, Context, HubRequest, InboundMessage, MethodError, MethodKind, Status,
    StreamReceiver,
};
use stratus_server::format_error_detail;

use crate::connection::{HubConnection, StreamingCallContext};
use crate::context::HubContext;
use crate::definition::{Hook, HubDefinition};
use crate::heartbeat;
use crate::writer::QueuedResponseWriter;

/// Background tasks of one connection, stopped by teardown.
#[derive(Default)]
struct Tasks {
    consumer: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

/// Serve a hub connection on the stream attached to `ctx`.
///
/// Returns once the client has closed its side (or sent something
/// unreadable) and the connection has been torn down.
pub(crate) async fn run(definition: Arc<HubDefinition>, ctx: &mut CallContext) -> Result<(), MethodError> {
    let stream = ctx
        .take_stream()
        .ok_or_else(|| Status::internal("hub connection has no stream attached"))?;

    let id = ConnectionId::next();
    ctx.context_mut().connection_id = Some(id);

    let disconnected = Arc::new(AtomicBool::new(false));
    let writer = QueuedResponseWriter::new(stream.sender, disconnected.clone());
    let connection = Arc::new(
        HubConnection::new(
            id,
            definition.name().clone(),
            writer,
            definition.groups().clone(),
            disconnected,
            definition.options().client_result_timeout,
        )
        .with_heartbeat_timeout(definition.options().heartbeat_timeout),
    );
    let call = StreamingCallContext::new(ctx.context().clone(), stream.receiver, connection);

    tracing::debug!(hub = %definition.name(), connection = %id, "hub connecting");
    let mut tasks = Tasks::default();
    let result = serve(&definition, call.context.clone(), call.connection.clone(), call.receiver, &mut tasks).await;
    teardown(&definition, &call.context, &call.connection, tasks).await;
    tracing::debug!(hub = %definition.name(), connection = %id, ok = result.is_ok(), "hub disconnected");
    result
}

async fn run_hook(hook: Option<&Hook>, ctx: &HubContext) -> Result<(), MethodError> {
    match hook {
        Some(hook) => hook(ctx.clone()).await,
        None => Ok(()),
    }
}

async fn serve(
    definition: &Arc<HubDefinition>,
    context: Context,
    connection: Arc<HubConnection>,
    mut receiver: Box<dyn StreamReceiver>,
    tasks: &mut Tasks,
) -> Result<(), MethodError> {
    let hub_ctx = HubContext::new(connection.clone(), context.clone());
    run_hook(definition.hooks.on_connecting.as_ref(), &hub_ctx).await?;

    connection.writer().write(hub::marker_message());
    connection.set_connected();
    tracing::debug!(hub = %definition.name(), connection = %connection.id(), "hub connected");

    run_hook(definition.hooks.on_connected.as_ref(), &hub_ctx).await?;

    let (tx, rx) = mpsc::channel(definition.options().request_queue_capacity.max(1));
    tasks.consumer = Some(tokio::spawn(consume(definition.clone(), context, connection.clone(), rx)));
    if let Some(interval) = definition.options().heartbeat_interval {
        tasks.heartbeat = Some(tokio::spawn(heartbeat::run(connection.clone(), interval)));
    }

    loop {
        let received = tokio::select! {
            () = connection.heartbeat().expired() => {
                tracing::debug!(connection = %connection.id(), "closing unresponsive connection");
                return Ok(());
            }
            received = receiver.recv() => received,
        };
        let bytes = match received {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(()),
            Err(error) => {
                tracing::debug!(connection = %connection.id(), error = %error, "hub stream ended");
                return Ok(());
            }
        };

        match hub::decode_inbound(&bytes) {
            Ok(InboundMessage::Request(request)) => {
                if tx.send(request).await.is_err() {
                    return Ok(());
                }
            }
            Ok(InboundMessage::ClientResult(result)) => {
                connection.client_results().complete(result);
            }
            Ok(InboundMessage::HeartbeatAck { sequence }) => {
                connection.heartbeat().ack(sequence);
            }
            Ok(InboundMessage::ClientHeartbeat { sequence, sent_at, extra }) => {
                let echo = hub::client_heartbeat_response_message(sequence, sent_at, extra.as_deref());
                connection.writer().write(echo);
            }
            Err(error) => {
                tracing::warn!(connection = %connection.id(), error = %error, "malformed hub message");
                return Err(Status::invalid_argument(format!("malformed hub message: {error}")).into());
            }
        }
    }
}

async fn consume(
    definition: Arc<HubDefinition>,
    context: Context,
    connection: Arc<HubConnection>,
    mut rx: mpsc::Receiver<HubRequest>,
) {
    while let Some(request) = rx.recv().await {
        // Only set once teardown stopped waiting for us.
        if connection.is_disconnected() {
            tracing::debug!(
                connection = %connection.id(),
                dropped = rx.len() + 1,
                "shutdown timeout passed, skipping queued requests"
            );
            break;
        }
        process(&definition, &context, &connection, request).await;
    }
}

async fn process(definition: &HubDefinition, context: &Context, connection: &Arc<HubConnection>, request: HubRequest) {
    let writer = connection.writer();

    let Some(handler) = definition.method(request.method_id) else {
        tracing::debug!(
            hub = %definition.name(),
            connection = %connection.id(),
            method_id = request.method_id,
            "unknown hub method"
        );
        if let Some(message_id) = request.message_id {
            let status = Status::unimplemented(format!(
                "StreamingHub method '{}' is not found in StreamingHub.",
                request.method_id
            ));
            writer.write(hub::error_message(message_id, &status, None));
        }
        return;
    };

    let descriptor = handler.descriptor();
    let child = context
        .child(descriptor.method.clone(), MethodKind::Unary)
        .with_attributes(handler.attributes().clone());
    let mut ctx = CallContext::new(child, request.payload.unwrap_or_default());
    ctx.extensions_mut().insert(connection.clone());

    tracing::debug!(
        method = %descriptor.path(),
        connection = %connection.id(),
        request_id = ctx.context().request_id,
        "hub method begin"
    );
    let result = handler.invoke_raw(&mut ctx).await;
    let elapsed = ctx.context().elapsed();
    tracing::debug!(
        method = %descriptor.path(),
        connection = %connection.id(),
        elapsed_us = elapsed.as_micros() as u64,
        ok = result.is_ok() && ctx.status().is_none(),
        "hub method end"
    );

    let outcome = match result {
        Ok(()) => ctx.into_result().map_err(MethodError::Status),
        Err(error) => Err(error),
    };

    let message = match (outcome, request.message_id) {
        (Ok(payload), Some(message_id)) => {
            hub::response_message(message_id, request.method_id, payload.as_deref())
        }
        (Err(MethodError::Status(status)), Some(message_id)) => {
            hub::error_message(message_id, &status, None)
        }
        (Err(MethodError::Unhandled(error)), message_id) => {
            tracing::error!(
                method = %descriptor.path(),
                connection = %connection.id(),
                error = %error,
                "unhandled error in hub method"
            );
            let Some(message_id) = message_id else {
                return;
            };
            let status = Status::internal(format!(
                "An error occurred while processing handler '{}'.",
                descriptor.path()
            ));
            let detail = definition
                .return_error_detail
                .then(|| format_error_detail(&*error, definition.max_error_detail_len));
            hub::error_message(message_id, &status, detail.as_deref())
        }
        (_, None) => return,
    };
    writer.write(message);
}

async fn teardown(
    definition: &HubDefinition,
    context: &Context,
    connection: &Arc<HubConnection>,
    tasks: Tasks,
) {
    if let Some(heartbeat) = tasks.heartbeat {
        heartbeat.abort();
    }

    // The reader is gone, so the request queue is closed. Let the consumer
    // finish what was already read.
    if let Some(mut task) = tasks.consumer {
        let timeout = definition.options().shutdown_timeout;
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(connection = %connection.id(), error = %error, "hub consumer task failed");
            }
            Err(_) => {
                tracing::warn!(
                    connection = %connection.id(),
                    timeout_ms = timeout.as_millis() as u64,
                    "hub method still running at shutdown"
                );
            }
        }
    }
    connection.mark_disconnected();

    let hub_ctx = HubContext::new(connection.clone(), context.clone());
    if let Err(error) = run_hook(definition.hooks.on_disconnected.as_ref(), &hub_ctx).await {
        tracing::warn!(connection = %connection.id(), error = %error, "on_disconnected failed");
    }

    connection.leave_all();
    connection.client_results().cancel_all();

    let writer = connection.writer();
    writer.dispose();
    writer.closed().await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ntex_bytes::Bytes;
    use parking_lot::Mutex;
    use stratus_codec::{Element, MethodArgs, decode_response};
    use stratus_core::{
        MemoryPeer, Metadata, Nil, OutboundMessage, StatusCode, StreamHandle, method_id,
    };
    use stratus_middleware::Dependencies;
    use stratus_server::{BuildEnv, ServerOptions};

    use super::*;
    use crate::definition::{HubBuilder, HubOptions};

    fn build(hub: HubBuilder, options: &ServerOptions) -> Arc<HubDefinition> {
        let deps = Dependencies::new();
        Arc::new(
            hub.build_definition(&BuildEnv {
                options,
                dependencies: &deps,
            })
            .unwrap(),
        )
    }

    fn connect(hub: Arc<HubDefinition>) -> (JoinHandle<Result<(), MethodError>>, MemoryPeer) {
        let (handle, peer) = StreamHandle::memory();
        let task = tokio::spawn(async move {
            let context = Context::new(hub.name().clone(), "Connect", MethodKind::DuplexStreaming)
                .with_metadata(Metadata::new());
            let mut ctx = CallContext::new(context, Bytes::new()).with_stream(handle);
            run(hub, &mut ctx).await
        });
        (task, peer)
    }

    async fn next(peer: &mut MemoryPeer) -> OutboundMessage {
        let bytes = peer.recv().await.unwrap();
        hub::decode_outbound(&bytes).unwrap()
    }

    fn echo_hub() -> HubBuilder {
        HubBuilder::new("Echo")
            .method("Echo", |_ctx: HubContext, (text,): (String,)| async move {
                Ok::<_, MethodError>(text)
            })
            .method("Add", |_ctx: HubContext, (a, b): (i32, i32)| async move {
                Ok::<_, MethodError>(a + b)
            })
            .method("Deny", |_ctx: HubContext, (): ()| async move {
                Err::<Nil, _>(MethodError::from(Status::permission_denied("nope")))
            })
            .method("Crash", |_ctx: HubContext, (): ()| async move {
                Err::<Nil, _>(MethodError::unhandled("boom"))
            })
    }

    #[tokio::test]
    async fn test_marker_then_responses_in_order() {
        let (task, mut peer) = connect(build(echo_hub(), &ServerOptions::default()));
        assert_eq!(next(&mut peer).await, OutboundMessage::Marker);

        let text = String::from("hello").encode_element().unwrap();
        peer.send(hub::request_message(1, method_id("Echo"), Some(&text[..]))).unwrap();
        let args = (2i32, 3i32).encode_payload().unwrap();
        peer.send(hub::request_message(2, method_id("Add"), args.as_deref())).unwrap();

        let OutboundMessage::Response { message_id, method_id: id, payload } = next(&mut peer).await else {
            panic!("expected response");
        };
        assert_eq!((message_id, id), (1, method_id("Echo")));
        assert_eq!(decode_response::<String>(payload.as_deref()).unwrap(), "hello");

        let OutboundMessage::Response { message_id, payload, .. } = next(&mut peer).await else {
            panic!("expected response");
        };
        assert_eq!(message_id, 2);
        assert_eq!(decode_response::<i32>(payload.as_deref()).unwrap(), 5);

        peer.close();
        task.await.unwrap().unwrap();
        assert!(peer.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_errors_are_per_call() {
        let (task, mut peer) = connect(build(echo_hub(), &ServerOptions::default()));
        assert_eq!(next(&mut peer).await, OutboundMessage::Marker);

        peer.send(hub::request_message(1, method_id("Deny"), None)).unwrap();
        peer.send(hub::request_message(2, method_id("Crash"), None)).unwrap();
        peer.send(hub::request_message(3, 12345, None)).unwrap();
        // Fire-and-forget failures produce nothing.
        peer.send(hub::fire_and_forget_message(method_id("Crash"), None)).unwrap();
        peer.send(hub::fire_and_forget_message(12345, None)).unwrap();
        let args = (1i32, 1i32).encode_payload().unwrap();
        peer.send(hub::request_message(4, method_id("Add"), args.as_deref())).unwrap();

        let OutboundMessage::Error { message_id, status, message } = next(&mut peer).await else {
            panic!("expected error");
        };
        assert_eq!(message_id, 1);
        assert_eq!(status.code, StatusCode::PermissionDenied);
        assert_eq!(status.detail, "nope");
        assert_eq!(message, None);

        let OutboundMessage::Error { message_id, status, message } = next(&mut peer).await else {
            panic!("expected error");
        };
        assert_eq!(message_id, 2);
        assert_eq!(status.code, StatusCode::Internal);
        assert_eq!(status.detail, "An error occurred while processing handler 'Echo/Crash'.");
        assert_eq!(message, None);

        let OutboundMessage::Error { message_id, status, .. } = next(&mut peer).await else {
            panic!("expected error");
        };
        assert_eq!(message_id, 3);
        assert_eq!(status.code, StatusCode::Unimplemented);
        assert_eq!(status.detail, "StreamingHub method '12345' is not found in StreamingHub.");

        let OutboundMessage::Response { message_id, .. } = next(&mut peer).await else {
            panic!("expected response");
        };
        assert_eq!(message_id, 4);

        peer.close();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_error_detail_when_enabled() {
        let options = ServerOptions::default().with_error_detail(true);
        let (task, mut peer) = connect(build(echo_hub(), &options));
        assert_eq!(next(&mut peer).await, OutboundMessage::Marker);

        peer.send(hub::request_message(9, method_id("Crash"), None)).unwrap();
        let OutboundMessage::Error { message, .. } = next(&mut peer).await else {
            panic!("expected error");
        };
        assert!(message.unwrap().contains("boom"));

        peer.close();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_message_closes_connection() {
        let (task, mut peer) = connect(build(echo_hub(), &ServerOptions::default()));
        assert_eq!(next(&mut peer).await, OutboundMessage::Marker);

        peer.send(Bytes::from_static(&[1, 2])).unwrap();
        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.as_status().unwrap().code, StatusCode::InvalidArgument);
        assert!(peer.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_lifecycle_hooks_and_group_cleanup() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let hub = {
            let (a, b, c) = (events.clone(), events.clone(), events.clone());
            HubBuilder::new("Lobby")
                .method("Ping", |_ctx: HubContext, (): ()| async move { Ok::<_, MethodError>(Nil) })
                .on_connecting(move |ctx: HubContext| {
                    let events = a.clone();
                    async move {
                        assert!(ctx.context().connection_id.is_some());
                        events.lock().push("connecting");
                        Ok::<_, MethodError>(())
                    }
                })
                .on_connected(move |ctx: HubContext| {
                    let events = b.clone();
                    async move {
                        ctx.join("lobby");
                        events.lock().push("connected");
                        Ok::<_, MethodError>(())
                    }
                })
                .on_disconnected(move |ctx: HubContext| {
                    let events = c.clone();
                    async move {
                        assert!(ctx.is_disconnected());
                        events.lock().push("disconnected");
                        Err::<(), _>(MethodError::unhandled("ignored"))
                    }
                })
        };
        let hub = build(hub, &ServerOptions::default());
        let (task, mut peer) = connect(hub.clone());

        assert_eq!(next(&mut peer).await, OutboundMessage::Marker);
        peer.send(hub::request_message(1, method_id("Ping"), None)).unwrap();
        assert!(matches!(next(&mut peer).await, OutboundMessage::Response { message_id: 1, .. }));
        // Joined in on_connected, before any request was read.
        assert_eq!(hub.groups().try_get("lobby").unwrap().member_count(), 1);

        peer.close();
        task.await.unwrap().unwrap();
        assert_eq!(*events.lock(), ["connecting", "connected", "disconnected"]);
        assert!(hub.groups().try_get("lobby").is_none());
    }

    #[tokio::test]
    async fn test_rejected_on_connecting() {
        let hub = HubBuilder::new("Vault").on_connecting(|_ctx: HubContext| async move {
            Err::<(), _>(MethodError::from(Status::permission_denied("members only")))
        });
        let (task, mut peer) = connect(build(hub, &ServerOptions::default()));

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.as_status().unwrap().detail, "members only");
        // No marker was sent.
        assert!(peer.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_client_result_completed_by_reader() {
        let hub = HubBuilder::new("Quiz").method("Start", |ctx: HubContext, (): ()| async move {
            let answer: u32 = ctx.invoke_client("Ask", &(String::from("2+2?"),), None).await?;
            Ok::<_, MethodError>(answer)
        });
        let (task, mut peer) = connect(build(hub, &ServerOptions::default()));
        assert_eq!(next(&mut peer).await, OutboundMessage::Marker);

        peer.send(hub::request_message(1, method_id("Start"), None)).unwrap();
        let OutboundMessage::ClientInvoke { id, method_id: mid, .. } = next(&mut peer).await else {
            panic!("expected client invocation");
        };
        let four = 4u32.encode_element().unwrap();
        peer.send(hub::client_result_message(id, mid, Some(&four[..]))).unwrap();

        let OutboundMessage::Response { message_id, payload, .. } = next(&mut peer).await else {
            panic!("expected response");
        };
        assert_eq!(message_id, 1);
        assert_eq!(decode_response::<u32>(payload.as_deref()).unwrap(), 4);

        peer.close();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_pending_client_result_cancelled_on_disconnect() {
        let outcome = Arc::new(Mutex::new(None));
        let hub = {
            let outcome = outcome.clone();
            HubBuilder::new("Quiz")
                .options(HubOptions::new().with_shutdown_timeout(Duration::from_millis(20)))
                .method("Start", move |ctx: HubContext, (): ()| {
                    let outcome = outcome.clone();
                    async move {
                        let result = ctx.invoke_client::<_, u32>("Ask", &(), Some(Duration::from_secs(30))).await;
                        *outcome.lock() = Some(result.map_err(|e| e.is_connection_error()));
                        Ok::<_, MethodError>(Nil)
                    }
                })
        };
        let (task, mut peer) = connect(build(hub, &ServerOptions::default()));
        assert_eq!(next(&mut peer).await, OutboundMessage::Marker);

        peer.send(hub::fire_and_forget_message(method_id("Start"), None)).unwrap();
        assert!(matches!(next(&mut peer).await, OutboundMessage::ClientInvoke { .. }));

        // Teardown gives up waiting for the handler, then fails its call.
        peer.close();
        task.await.unwrap().unwrap();
        for _ in 0..100 {
            if outcome.lock().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*outcome.lock(), Some(Err(true)));
    }

    #[tokio::test]
    async fn test_requests_read_before_close_are_processed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hub = {
            let (a, b) = (log.clone(), log.clone());
            HubBuilder::new("Journal")
                .method("Slow", move |_ctx: HubContext, (): ()| {
                    let log = a.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        log.lock().push("slow");
                        Ok::<_, MethodError>(Nil)
                    }
                })
                .method("Record", move |_ctx: HubContext, (): ()| {
                    let log = b.clone();
                    async move {
                        log.lock().push("record");
                        Ok::<_, MethodError>(Nil)
                    }
                })
        };
        let (task, mut peer) = connect(build(hub, &ServerOptions::default()));
        assert_eq!(next(&mut peer).await, OutboundMessage::Marker);

        peer.send(hub::fire_and_forget_message(method_id("Slow"), None)).unwrap();
        peer.send(hub::fire_and_forget_message(method_id("Record"), None)).unwrap();
        peer.close();

        task.await.unwrap().unwrap();
        assert_eq!(*log.lock(), ["slow", "record"]);
    }

    #[tokio::test]
    async fn test_join_after_shutdown_timeout_is_refused() {
        let joined = Arc::new(Mutex::new(None));
        let hub = {
            let joined = joined.clone();
            HubBuilder::new("Lobby")
                .options(HubOptions::new().with_shutdown_timeout(Duration::from_millis(20)))
                .method("LateJoin", move |ctx: HubContext, (): ()| {
                    let joined = joined.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        *joined.lock() = Some(ctx.join("room").is_some());
                        Ok::<_, MethodError>(Nil)
                    }
                })
        };
        let definition = build(hub, &ServerOptions::default());
        let (task, mut peer) = connect(definition.clone());
        assert_eq!(next(&mut peer).await, OutboundMessage::Marker);

        peer.send(hub::fire_and_forget_message(method_id("LateJoin"), None)).unwrap();
        peer.close();
        task.await.unwrap().unwrap();

        // The handler outlives teardown and joins afterwards.
        for _ in 0..100 {
            if joined.lock().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*joined.lock(), Some(false));
        assert!(definition.groups().try_get("room").is_none());
    }

    #[tokio::test]
    async fn test_rejected_on_connected_tears_down() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let hub = {
            let (a, b) = (events.clone(), events.clone());
            HubBuilder::new("Lobby")
                .on_connected(move |ctx: HubContext| {
                    let events = a.clone();
                    async move {
                        ctx.join("lobby");
                        events.lock().push("connected");
                        Err::<(), _>(MethodError::from(Status::new(StatusCode::FailedPrecondition, "lobby closed")))
                    }
                })
                .on_disconnected(move |_ctx: HubContext| {
                    let events = b.clone();
                    async move {
                        events.lock().push("disconnected");
                        Ok::<_, MethodError>(())
                    }
                })
        };
        let definition = build(hub, &ServerOptions::default());
        let (task, mut peer) = connect(definition.clone());

        let err = task.await.unwrap().unwrap_err();
        let status = err.as_status().unwrap();
        assert_eq!(status.code, StatusCode::FailedPrecondition);
        assert_eq!(status.detail, "lobby closed");
        assert_eq!(*events.lock(), ["connected", "disconnected"]);
        assert!(definition.groups().try_get("lobby").is_none());

        // At most the marker went out before the stream was closed.
        while let Some(bytes) = peer.recv().await {
            assert_eq!(hub::decode_outbound(&bytes).unwrap(), OutboundMessage::Marker);
        }
    }

    fn pulse_hub(interval: Duration, timeout: Duration) -> HubBuilder {
        HubBuilder::new("Pulse")
            .options(
                HubOptions::new()
                    .with_heartbeat_interval(interval)
                    .with_heartbeat_timeout(timeout),
            )
            .method("Latency", |ctx: HubContext, (): ()| async move {
                Ok::<_, MethodError>(ctx.heartbeat_latency().is_some())
            })
    }

    #[tokio::test]
    async fn test_answered_heartbeats_keep_connection() {
        let hub = pulse_hub(Duration::from_millis(100), Duration::from_secs(1));
        let (task, mut peer) = connect(build(hub, &ServerOptions::default()));
        assert_eq!(next(&mut peer).await, OutboundMessage::Marker);

        let OutboundMessage::Heartbeat { sequence, sent_at, metadata } = next(&mut peer).await else {
            panic!("expected heartbeat");
        };
        assert_eq!(sequence, 0);
        assert!(sent_at > 0);
        assert_eq!(metadata, None);
        peer.send(hub::heartbeat_ack_message(sequence, sent_at)).unwrap();
        peer.send(hub::request_message(1, method_id("Latency"), None)).unwrap();

        let measured = loop {
            match next(&mut peer).await {
                OutboundMessage::Heartbeat { sequence, sent_at, .. } => {
                    peer.send(hub::heartbeat_ack_message(sequence, sent_at)).unwrap();
                }
                OutboundMessage::Response { message_id: 1, payload, .. } => {
                    break decode_response::<bool>(payload.as_deref()).unwrap();
                }
                other => panic!("unexpected {other:?}"),
            }
        };
        assert!(measured);

        peer.close();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unanswered_heartbeat_closes_connection() {
        let hub = pulse_hub(Duration::from_millis(10), Duration::from_millis(30));
        let (task, mut peer) = connect(build(hub, &ServerOptions::default()));
        assert_eq!(next(&mut peer).await, OutboundMessage::Marker);

        // The client never answers and never closes.
        task.await.unwrap().unwrap();

        let mut beats = 0;
        while let Some(bytes) = peer.recv().await {
            assert!(matches!(hub::decode_outbound(&bytes).unwrap(), OutboundMessage::Heartbeat { .. }));
            beats += 1;
        }
        assert!(beats >= 1);
    }

    #[tokio::test]
    async fn test_client_heartbeat_is_echoed() {
        let (task, mut peer) = connect(build(echo_hub(), &ServerOptions::default()));
        assert_eq!(next(&mut peer).await, OutboundMessage::Marker);

        peer.send(hub::client_heartbeat_message(5, 1234, Some(&b"x"[..]))).unwrap();
        assert_eq!(
            next(&mut peer).await,
            OutboundMessage::ClientHeartbeatResponse {
                sequence: 5,
                sent_at: 1234,
                extra: Some(Bytes::from_static(b"x")),
            }
        );

        peer.close();
        task.await.unwrap().unwrap();
    }
}
