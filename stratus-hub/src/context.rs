//! The view hub methods and lifecycle hooks get of their connection.

use std::sync::Arc;
use std::time::Duration;

use stratus_codec::{Element, MethodArgs, decode_response, hub};
use stratus_core::{
    CodecError, ConnectionId, Context, StratusError, TransportError, method_id,
};

use crate::connection::HubConnection;
use crate::group::{self, Group, GroupRepository};

/// Connection-scoped handle passed to hub methods and hooks.
///
/// Cheap to clone. Broadcast and send methods take the client-side method
/// name and resolve its id the same way hub methods are resolved.
#[derive(Debug, Clone)]
pub struct HubContext {
    connection: Arc<HubConnection>,
    context: Context,
}

impl HubContext {
    #[must_use]
    pub fn new(connection: Arc<HubConnection>, context: Context) -> Self {
        Self { connection, context }
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<HubConnection> {
        &self.connection
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.connection.is_disconnected()
    }

    /// Round trip of the last answered server heartbeat, if heartbeats
    /// are enabled.
    #[must_use]
    pub fn heartbeat_latency(&self) -> Option<Duration> {
        self.connection.heartbeat_latency()
    }

    /// Join a group. Joining a group twice is a no-op, and joining after
    /// the connection went away returns `None`.
    pub fn join(&self, group: &str) -> Option<Arc<dyn Group>> {
        self.connection.join(group)
    }

    /// Leave a group. Returns `false` if this connection wasn't a member.
    pub fn leave(&self, group: &str) -> bool {
        self.connection.leave(group)
    }

    #[must_use]
    pub fn group_repository(&self) -> &Arc<dyn GroupRepository> {
        self.connection.groups()
    }

    /// Call `method` on every member of `group`, this connection included.
    ///
    /// Returns how many members accepted the message; 0 if the group
    /// doesn't exist.
    pub fn broadcast<A: MethodArgs>(&self, group: &str, method: &str, args: &A) -> Result<usize, CodecError> {
        match self.connection.groups().try_get(group) {
            Some(group) => group::broadcast_to(group.as_ref(), method_id(method), args),
            None => Ok(0),
        }
    }

    /// Call `method` on every member of `group` except this connection.
    pub fn broadcast_except_self<A: MethodArgs>(
        &self,
        group: &str,
        method: &str,
        args: &A,
    ) -> Result<usize, CodecError> {
        match self.connection.groups().try_get(group) {
            Some(group) => group::broadcast_except(
                group.as_ref(),
                method_id(method),
                args,
                &[self.connection.id()],
            ),
            None => Ok(0),
        }
    }

    /// Call `method` on this connection only.
    pub fn send<A: MethodArgs>(&self, method: &str, args: &A) -> Result<bool, CodecError> {
        let payload = args.encode_payload()?;
        let message = hub::broadcast_message(method_id(method), payload.as_deref());
        Ok(self.connection.writer().write(message))
    }

    /// Call `method` on the client and wait for its result.
    ///
    /// `timeout` defaults to the hub's client result timeout.
    pub async fn invoke_client<A, R>(&self, method: &str, args: &A, timeout: Option<Duration>) -> Result<R, StratusError>
    where
        A: MethodArgs,
        R: Element + 'static,
    {
        let id = method_id(method);
        let payload = args.encode_payload()?;
        let results = self.connection.client_results();
        let (call_id, rx) = results.register(id);

        let message = hub::client_invoke_message(call_id, id, payload.as_deref());
        if !self.connection.writer().write(message) {
            results.cancel(call_id);
            return Err(TransportError::ConnectionClosed.into());
        }

        let timeout = timeout.unwrap_or_else(|| self.connection.client_result_timeout());
        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome?,
            Ok(Err(_)) => return Err(StratusError::Cancelled),
            Err(_) => {
                results.cancel(call_id);
                tracing::debug!(
                    connection = %self.connection.id(),
                    method,
                    call_id,
                    "client result timed out"
                );
                return Err(StratusError::Timeout(timeout));
            }
        };

        Ok(decode_response::<R>(outcome.as_deref())?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use ntex_bytes::Bytes;
    use stratus_core::{
        ClientResult, ClientResultError, MemoryPeer, MethodKind, OutboundMessage, Status,
        StreamHandle,
    };

    use super::*;
    use crate::group::InMemoryGroupRepository;
    use crate::writer::QueuedResponseWriter;

    fn hub_context(repo: Arc<dyn GroupRepository>) -> (HubContext, MemoryPeer) {
        let (handle, peer) = StreamHandle::memory();
        let disconnected = Arc::new(AtomicBool::new(false));
        let connection = Arc::new(HubConnection::new(
            ConnectionId::next(),
            "Chat".into(),
            QueuedResponseWriter::new(handle.sender, disconnected.clone()),
            repo,
            disconnected,
            Duration::from_secs(5),
        ));
        let context = Context::new("Chat", "Connect", MethodKind::DuplexStreaming)
            .with_connection(connection.id());
        (HubContext::new(connection, context), peer)
    }

    async fn drain(ctx: &HubContext, peer: &mut MemoryPeer) -> Vec<OutboundMessage> {
        ctx.connection().writer().dispose();
        ctx.connection().writer().closed().await;
        let mut messages = Vec::new();
        while let Some(bytes) = peer.recv().await {
            messages.push(hub::decode_outbound(&bytes).unwrap());
        }
        messages
    }

    #[tokio::test]
    async fn test_broadcast_and_except_self() {
        let repo: Arc<dyn GroupRepository> = Arc::new(InMemoryGroupRepository::new());
        let (alice, mut alice_peer) = hub_context(repo.clone());
        let (bob, mut bob_peer) = hub_context(repo.clone());

        alice.join("room");
        bob.join("room");

        assert_eq!(alice.broadcast("room", "OnMessage", &(String::from("hi"),)).unwrap(), 2);
        assert_eq!(
            alice
                .broadcast_except_self("room", "OnMessage", &(String::from("psst"),))
                .unwrap(),
            1
        );
        assert_eq!(alice.broadcast("nowhere", "OnMessage", &()).unwrap(), 0);

        assert_eq!(drain(&alice, &mut alice_peer).await.len(), 1);
        let received = drain(&bob, &mut bob_peer).await;
        assert_eq!(received.len(), 2);
        for message in received {
            let OutboundMessage::Broadcast { method_id: id, .. } = message else {
                panic!("expected broadcast");
            };
            assert_eq!(id, method_id("OnMessage"));
        }
    }

    #[tokio::test]
    async fn test_send_targets_own_connection() {
        let repo: Arc<dyn GroupRepository> = Arc::new(InMemoryGroupRepository::new());
        let (ctx, mut peer) = hub_context(repo);

        assert!(ctx.send("OnWelcome", &(7u32,)).unwrap());
        let messages = drain(&ctx, &mut peer).await;
        assert!(matches!(
            &messages[..],
            [OutboundMessage::Broadcast { method_id: id, payload: Some(_) }] if *id == method_id("OnWelcome")
        ));
    }

    #[tokio::test]
    async fn test_invoke_client_round_trip() {
        let repo: Arc<dyn GroupRepository> = Arc::new(InMemoryGroupRepository::new());
        let (ctx, mut peer) = hub_context(repo);

        let call = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.invoke_client::<_, u32>("Ask", &(String::from("q"),), None).await })
        };

        let bytes = peer.recv().await.unwrap();
        let OutboundMessage::ClientInvoke { id, method_id: mid, .. } = hub::decode_outbound(&bytes).unwrap() else {
            panic!("expected client invocation");
        };
        assert_eq!(mid, method_id("Ask"));

        let answer = 42u32.encode_element().unwrap();
        ctx.connection().client_results().complete(ClientResult {
            id,
            method_id: mid,
            outcome: Ok(Some(Bytes::copy_from_slice(&answer))),
        });
        assert_eq!(call.await.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_invoke_client_error_and_timeout() {
        let repo: Arc<dyn GroupRepository> = Arc::new(InMemoryGroupRepository::new());
        let (ctx, mut peer) = hub_context(repo);

        let call = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.invoke_client::<_, u32>("Ask", &(), None).await })
        };
        let bytes = peer.recv().await.unwrap();
        let OutboundMessage::ClientInvoke { id, .. } = hub::decode_outbound(&bytes).unwrap() else {
            panic!("expected client invocation");
        };
        ctx.connection().client_results().complete(ClientResult {
            id,
            method_id: method_id("Ask"),
            outcome: Err(ClientResultError {
                status: Status::unavailable("busy"),
                message: None,
            }),
        });
        assert!(matches!(call.await.unwrap(), Err(StratusError::Status(s)) if s.detail == "busy"));

        let err = ctx
            .invoke_client::<_, u32>("Ask", &(), Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, StratusError::Timeout(_)));
        assert_eq!(ctx.connection().client_results().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_invoke_client_after_disconnect() {
        let repo: Arc<dyn GroupRepository> = Arc::new(InMemoryGroupRepository::new());
        let (ctx, _peer) = hub_context(repo);
        ctx.connection().mark_disconnected();

        let err = ctx.invoke_client::<_, u32>("Ask", &(), None).await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(ctx.is_disconnected());
    }
}
