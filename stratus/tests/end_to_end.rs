//! Services and hubs driven through `Server` over in-memory streams.

use std::sync::Arc;

use parking_lot::Mutex;
use stratus::prelude::*;
use stratus::{
    BoxError, BoxFuture, Bytes, CallContext, Dependencies, Filter, FilterDescriptor, FilterResult,
    MemoryPeer, MethodOptions, Next, OutboundMessage, ServerOptions, StatusCode, StreamHandle, hub,
    method_id,
};

type Log = Arc<Mutex<Vec<String>>>;

struct Record {
    name: &'static str,
    log: Log,
}

impl Filter for Record {
    fn invoke<'a>(&'a self, ctx: &'a mut CallContext, next: Next<'a>) -> BoxFuture<'a, FilterResult> {
        Box::pin(async move {
            self.log.lock().push(format!("{}:{}", self.name, ctx.context().method));
            next.run(ctx).await
        })
    }
}

fn record(name: &'static str) -> FilterDescriptor {
    FilterDescriptor::factory(move |deps: &Dependencies| {
        let log = deps.require::<Log>()?;
        Ok::<_, BoxError>(Record {
            name,
            log: (*log).clone(),
        })
    })
}

struct RequireUser;

impl Filter for RequireUser {
    fn invoke<'a>(&'a self, ctx: &'a mut CallContext, next: Next<'a>) -> BoxFuture<'a, FilterResult> {
        Box::pin(async move {
            if ctx.context().get_metadata("user").is_none() {
                return Err(Status::permission_denied("sign in first").into());
            }
            next.run(ctx).await
        })
    }
}

#[tokio::test]
async fn test_unary_through_filters() {
    let log = Log::default();
    let server = Server::builder()
        .dependency(log.clone())
        .options(ServerOptions::default().with_global_filter(record("global")))
        .service(
            ServiceBuilder::new("Greeter")
                .filter(record("class").with_order(10))
                .unary_with(
                    "Greet",
                    MethodOptions::new()
                        .filter(record("method").with_order(5))
                        .filter(FilterDescriptor::new(RequireUser).with_order(20)),
                    |ctx: Context, (greeting,): (String,)| async move {
                        let user = ctx.get_metadata("user").unwrap_or_default().to_string();
                        Ok::<_, MethodError>(format!("{greeting}, {user}!"))
                    },
                ),
        )
        .build()
        .unwrap();

    let request = (String::from("Hello"),).encode_payload().unwrap().unwrap_or_default();
    let metadata = Metadata::from([("user".to_string(), "ada".to_string())]);
    let response = server
        .unary("Greeter", "Greet", request.clone(), metadata)
        .await
        .unwrap();
    assert_eq!(decode_response::<String>(Some(&response[..])).unwrap(), "Hello, ada!");
    assert_eq!(*log.lock(), ["method:Greet", "class:Greet", "global:Greet"]);

    // RequireUser sorts after the recording filters and short-circuits.
    log.lock().clear();
    let status = server
        .unary("Greeter", "Greet", request, Metadata::new())
        .await
        .unwrap_err();
    assert_eq!(status.code, StatusCode::PermissionDenied);
    assert_eq!(log.lock().len(), 2);

    let status = server
        .unary("Greeter", "Missing", Bytes::new(), Metadata::new())
        .await
        .unwrap_err();
    assert_eq!(status.code, StatusCode::Unimplemented);
}

fn chat() -> HubBuilder {
    HubBuilder::new("Chat")
        .method("Join", |ctx: HubContext, (room,): (String,)| async move {
            ctx.join(&room);
            Ok::<_, MethodError>(Nil)
        })
        .method("Say", |ctx: HubContext, (room, text): (String, String)| async move {
            let user = ctx.context().get_metadata("user").unwrap_or("?").to_string();
            let delivered = ctx.broadcast(&room, "OnMessage", &(user, text))?;
            Ok::<_, MethodError>(delivered as u32)
        })
}

async fn next(peer: &mut MemoryPeer) -> OutboundMessage {
    let bytes = peer.recv().await.unwrap();
    hub::decode_outbound(&bytes).unwrap()
}

fn connect(server: &Arc<Server>, user: &str) -> (tokio::task::JoinHandle<Result<(), Status>>, MemoryPeer) {
    let (handle, peer) = StreamHandle::memory();
    let server = server.clone();
    let metadata = Metadata::from([("user".to_string(), user.to_string())]);
    let task = tokio::spawn(async move { server.duplex("Chat", "Connect", metadata, handle).await });
    (task, peer)
}

async fn call(peer: &mut MemoryPeer, message_id: i32, method: &str, args: &impl MethodArgs) {
    let payload = args.encode_payload().unwrap();
    peer.send(hub::request_message(message_id, method_id(method), payload.as_deref()))
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_chat_hub_broadcast() {
    let server = Arc::new(Server::builder().service(chat()).build().unwrap());
    assert!(server.handler("Chat", "Connect").is_some());

    let (alice_task, mut alice) = connect(&server, "alice");
    let (bob_task, mut bob) = connect(&server, "bob");
    assert_eq!(next(&mut alice).await, OutboundMessage::Marker);
    assert_eq!(next(&mut bob).await, OutboundMessage::Marker);

    for (peer, id) in [(&mut alice, 1), (&mut bob, 1)] {
        call(peer, id, "Join", &(String::from("lobby"),)).await;
        assert!(matches!(next(peer).await, OutboundMessage::Response { message_id: 1, payload: None, .. }));
    }

    call(&mut alice, 2, "Say", &(String::from("lobby"), String::from("hi bob"))).await;

    // The broadcast is queued on alice's writer before her response.
    let OutboundMessage::Broadcast { method_id: id, payload: broadcast } = next(&mut alice).await else {
        panic!("expected broadcast");
    };
    assert_eq!(id, method_id("OnMessage"));
    let (from, text) =
        <(String, String)>::decode_payload(broadcast.as_deref(), &<(String, String)>::defaults()).unwrap();
    assert_eq!((from.as_str(), text.as_str()), ("alice", "hi bob"));

    let OutboundMessage::Response { message_id, payload, .. } = next(&mut alice).await else {
        panic!("expected response");
    };
    assert_eq!(message_id, 2);
    assert_eq!(decode_response::<u32>(payload.as_deref()).unwrap(), 2);

    // Both members got the same encoded arguments.
    let OutboundMessage::Broadcast { payload: bob_broadcast, .. } = next(&mut bob).await else {
        panic!("expected broadcast");
    };
    assert_eq!(bob_broadcast, broadcast);

    alice.close();
    alice_task.await.unwrap().unwrap();

    // Alice left the group on disconnect.
    call(&mut bob, 2, "Say", &(String::from("lobby"), String::from("anyone?"))).await;
    assert!(matches!(next(&mut bob).await, OutboundMessage::Broadcast { .. }));
    let OutboundMessage::Response { payload, .. } = next(&mut bob).await else {
        panic!("expected response");
    };
    assert_eq!(decode_response::<u32>(payload.as_deref()).unwrap(), 1);

    bob.close();
    bob_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_hub_rejects_without_user() {
    let server = Server::builder()
        .service(HubBuilder::new("Chat").on_connecting(|ctx: HubContext| async move {
            match ctx.context().get_metadata("user") {
                Some(_) => Ok::<_, MethodError>(()),
                None => Err(Status::permission_denied("sign in first").into()),
            }
        }))
        .build()
        .unwrap();

    let (handle, mut peer) = StreamHandle::memory();
    let status = server
        .duplex("Chat", "Connect", Metadata::new(), handle)
        .await
        .unwrap_err();
    assert_eq!(status.code, StatusCode::PermissionDenied);
    assert!(peer.recv().await.is_none());
}
