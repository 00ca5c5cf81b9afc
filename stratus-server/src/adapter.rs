//! Statically-typed method bodies.
//!
//! Each adapter owns a user function and knows, from its type parameters,
//! how to decode the request, call the function and encode the response.
//! The matching signature is derived from the same types, so registration
//! and dispatch cannot disagree.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use ntex_bytes::Bytes;
use stratus_codec::{Element, MethodArgs, encode_response, is_nil};
use stratus_core::{
    BoxFuture, CallContext, Context, MethodError, MethodSignature, ReturnType, ReturnWrapper,
    Status, StreamHandle, StreamReceiver, StreamSender, ValueType,
};
use stratus_middleware::{FilterResult, MethodBody};

fn value_type<R: 'static>() -> ValueType {
    if is_nil::<R>() {
        ValueType::Nil
    } else {
        ValueType::named(std::any::type_name::<R>())
    }
}

fn signature<A: MethodArgs, R: 'static>(name: &str, wrapper: ReturnWrapper) -> MethodSignature {
    MethodSignature::new(name, ReturnType::new(wrapper, value_type::<R>()).asynchronous())
        .params(A::parameter_types())
}

fn request_payload(ctx: &CallContext) -> Option<&[u8]> {
    let request = ctx.request();
    if request.is_empty() { None } else { Some(&request[..]) }
}

fn take_stream(ctx: &mut CallContext) -> Result<StreamHandle, MethodError> {
    ctx.take_stream()
        .ok_or_else(|| Status::internal("streaming call has no stream attached").into())
}

/// Typed reader over the inbound stream of a client or duplex streaming call.
pub struct RequestReader<T> {
    receiver: Box<dyn StreamReceiver>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Element> RequestReader<T> {
    #[must_use]
    pub fn new(receiver: Box<dyn StreamReceiver>) -> Self {
        Self {
            receiver,
            _marker: PhantomData,
        }
    }

    /// Next message, or `None` once the client has finished sending.
    pub async fn next(&mut self) -> Result<Option<T>, MethodError> {
        match self.receiver.recv().await? {
            Some(bytes) => Ok(Some(T::decode_element(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// Typed writer over the outbound stream of a server or duplex streaming call.
pub struct ResponseWriter<T> {
    sender: Arc<dyn StreamSender>,
    _marker: PhantomData<fn(T)>,
}

impl<T> Clone for ResponseWriter<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Element> ResponseWriter<T> {
    #[must_use]
    pub fn new(sender: Arc<dyn StreamSender>) -> Self {
        Self {
            sender,
            _marker: PhantomData,
        }
    }

    /// Encode and send one message.
    pub async fn write(&self, value: &T) -> Result<(), MethodError> {
        let bytes = Bytes::copy_from_slice(&value.encode_element()?);
        self.sender.send(bytes).await?;
        Ok(())
    }
}

/// Body of a unary method: `Fn(Context, A) -> Result<R, MethodError>`.
pub struct UnaryBody<A, R, F> {
    f: F,
    defaults: A,
    _marker: PhantomData<fn() -> R>,
}

impl<A, R, F, Fut> UnaryBody<A, R, F>
where
    A: MethodArgs,
    R: Element + Send + 'static,
    F: Fn(Context, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
{
    #[must_use]
    pub fn new(f: F) -> Self {
        Self {
            f,
            defaults: A::defaults(),
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn signature(name: &str) -> MethodSignature {
        signature::<A, R>(name, ReturnWrapper::Unary)
    }
}

impl<A, R, F, Fut> MethodBody for UnaryBody<A, R, F>
where
    A: MethodArgs,
    R: Element + Send + 'static,
    F: Fn(Context, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut CallContext) -> BoxFuture<'a, FilterResult> {
        Box::pin(async move {
            let args = A::decode_payload(request_payload(ctx), &self.defaults)?;
            let value = (self.f)(ctx.context().clone(), args).await?;
            if let Some(bytes) = encode_response(&value)? {
                ctx.set_response(bytes);
            }
            Ok(())
        })
    }
}

/// Body of a server streaming method:
/// `Fn(Context, A, ResponseWriter<T>) -> Result<(), MethodError>`.
pub struct ServerStreamingBody<A, T, F> {
    f: F,
    defaults: A,
    _marker: PhantomData<fn(T)>,
}

impl<A, T, F, Fut> ServerStreamingBody<A, T, F>
where
    A: MethodArgs,
    T: Element + 'static,
    F: Fn(Context, A, ResponseWriter<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), MethodError>> + Send + 'static,
{
    #[must_use]
    pub fn new(f: F) -> Self {
        Self {
            f,
            defaults: A::defaults(),
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn signature(name: &str) -> MethodSignature {
        signature::<A, T>(name, ReturnWrapper::ServerStreaming)
    }
}

impl<A, T, F, Fut> MethodBody for ServerStreamingBody<A, T, F>
where
    A: MethodArgs,
    T: Element + 'static,
    F: Fn(Context, A, ResponseWriter<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), MethodError>> + Send + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut CallContext) -> BoxFuture<'a, FilterResult> {
        Box::pin(async move {
            let args = A::decode_payload(request_payload(ctx), &self.defaults)?;
            let stream = take_stream(ctx)?;
            let sender: Arc<dyn StreamSender> = Arc::from(stream.sender);

            let result = (self.f)(ctx.context().clone(), args, ResponseWriter::new(sender.clone())).await;
            sender.close().await?;
            result
        })
    }
}

/// Body of a client streaming method:
/// `Fn(Context, RequestReader<T>) -> Result<R, MethodError>`.
pub struct ClientStreamingBody<T, R, F> {
    f: F,
    _marker: PhantomData<fn(T) -> R>,
}

impl<T, R, F, Fut> ClientStreamingBody<T, R, F>
where
    T: Element + 'static,
    R: Element + Send + 'static,
    F: Fn(Context, RequestReader<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
{
    #[must_use]
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn signature(name: &str) -> MethodSignature {
        signature::<(), R>(name, ReturnWrapper::ClientStreaming)
    }
}

impl<T, R, F, Fut> MethodBody for ClientStreamingBody<T, R, F>
where
    T: Element + 'static,
    R: Element + Send + 'static,
    F: Fn(Context, RequestReader<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut CallContext) -> BoxFuture<'a, FilterResult> {
        Box::pin(async move {
            let stream = take_stream(ctx)?;
            let value = (self.f)(ctx.context().clone(), RequestReader::new(stream.receiver)).await?;
            if let Some(bytes) = encode_response(&value)? {
                ctx.set_response(bytes);
            }
            Ok(())
        })
    }
}

/// Body of a duplex streaming method:
/// `Fn(Context, RequestReader<T>, ResponseWriter<U>) -> Result<(), MethodError>`.
pub struct DuplexStreamingBody<T, U, F> {
    f: F,
    _marker: PhantomData<fn(T, U)>,
}

impl<T, U, F, Fut> DuplexStreamingBody<T, U, F>
where
    T: Element + 'static,
    U: Element + 'static,
    F: Fn(Context, RequestReader<T>, ResponseWriter<U>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), MethodError>> + Send + 'static,
{
    #[must_use]
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn signature(name: &str) -> MethodSignature {
        signature::<(), U>(name, ReturnWrapper::DuplexStreaming)
    }
}

impl<T, U, F, Fut> MethodBody for DuplexStreamingBody<T, U, F>
where
    T: Element + 'static,
    U: Element + 'static,
    F: Fn(Context, RequestReader<T>, ResponseWriter<U>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), MethodError>> + Send + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut CallContext) -> BoxFuture<'a, FilterResult> {
        Box::pin(async move {
            let stream = take_stream(ctx)?;
            let sender: Arc<dyn StreamSender> = Arc::from(stream.sender);

            let result = (self.f)(
                ctx.context().clone(),
                RequestReader::new(stream.receiver),
                ResponseWriter::new(sender.clone()),
            )
            .await;
            sender.close().await?;
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use stratus_codec::ArgumentTupleCodec;
    use stratus_core::{MethodKind, Nil, RequestShape, ResponseShape, resolve_service_method};

    use super::*;

    fn call_context(kind: MethodKind, request: Bytes) -> CallContext {
        CallContext::new(Context::new("Calc", "Op", kind), request)
    }

    #[test]
    fn test_derived_signatures_resolve() {
        type Add = UnaryBody<(i32, i32), i32, fn(Context, (i32, i32)) -> std::future::Ready<Result<i32, MethodError>>>;
        let descriptor = resolve_service_method("Calc", &Add::signature("Add")).unwrap();
        assert_eq!(descriptor.kind, MethodKind::Unary);
        assert_eq!(descriptor.request, RequestShape::ArgumentTuple(2));
        assert_eq!(descriptor.response, ResponseShape::SingleValue("i32".into()));

        type Ping = UnaryBody<(), Nil, fn(Context, ()) -> std::future::Ready<Result<Nil, MethodError>>>;
        let descriptor = resolve_service_method("Calc", &Ping::signature("Ping")).unwrap();
        assert_eq!(descriptor.request, RequestShape::None);
        assert_eq!(descriptor.response, ResponseShape::None);
    }

    #[tokio::test]
    async fn test_unary_tuple_arguments() {
        let body = UnaryBody::new(|_ctx: Context, (a, b): (i32, i32)| async move { Ok::<_, MethodError>(a + b) });
        let request = ArgumentTupleCodec::<(i32, i32)>::new().encode(&(2, 40)).unwrap();

        let mut ctx = call_context(MethodKind::Unary, request);
        body.call(&mut ctx).await.unwrap();

        let response = ctx.take_response().unwrap();
        assert_eq!(i32::decode_element(&response).unwrap(), 42);
    }

    #[tokio::test]
    async fn test_unary_nil_response_and_empty_request() {
        let body = UnaryBody::new(|_ctx: Context, (): ()| async move { Ok::<_, MethodError>(Nil) });
        let mut ctx = call_context(MethodKind::Unary, Bytes::new());
        body.call(&mut ctx).await.unwrap();
        assert!(ctx.response().is_none());
    }

    #[tokio::test]
    async fn test_unary_malformed_request_is_unhandled() {
        let body = UnaryBody::new(|_ctx: Context, (s,): (String,)| async move { Ok::<_, MethodError>(s) });
        let mut ctx = call_context(MethodKind::Unary, Bytes::from_static(&[1, 2, 3]));
        let err = body.call(&mut ctx).await.unwrap_err();
        assert!(matches!(err, MethodError::Unhandled(_)));
    }

    #[tokio::test]
    async fn test_server_streaming_writes_and_closes() {
        let body = ServerStreamingBody::new(|_ctx: Context, (n,): (u32,), writer: ResponseWriter<u32>| async move {
            for i in 0..n {
                writer.write(&i).await?;
            }
            Ok::<_, MethodError>(())
        });

        let (handle, mut peer) = StreamHandle::memory();
        let request = (3u32,).encode_payload().unwrap().unwrap();
        let mut ctx = call_context(MethodKind::ServerStreaming, request).with_stream(handle);
        body.call(&mut ctx).await.unwrap();

        let mut received = Vec::new();
        while let Some(bytes) = peer.recv().await {
            received.push(u32::decode_element(&bytes).unwrap());
        }
        assert_eq!(received, [0, 1, 2]);
    }

    #[tokio::test]
    async fn test_client_streaming_sums() {
        let body = ClientStreamingBody::new(|_ctx: Context, mut reader: RequestReader<u64>| async move {
            let mut total = 0;
            while let Some(value) = reader.next().await? {
                total += value;
            }
            Ok::<_, MethodError>(total)
        });

        let (handle, mut peer) = StreamHandle::memory();
        for value in [5u64, 6, 7] {
            peer.send(Bytes::copy_from_slice(&value.encode_element().unwrap())).unwrap();
        }
        peer.close();

        let mut ctx = call_context(MethodKind::ClientStreaming, Bytes::new()).with_stream(handle);
        body.call(&mut ctx).await.unwrap();
        let response = ctx.take_response().unwrap();
        assert_eq!(u64::decode_element(&response).unwrap(), 18);
    }

    #[tokio::test]
    async fn test_streaming_without_stream_fails() {
        let body = DuplexStreamingBody::new(
            |_ctx: Context, _reader: RequestReader<u32>, _writer: ResponseWriter<u32>| async move { Ok::<_, MethodError>(()) },
        );
        let mut ctx = call_context(MethodKind::DuplexStreaming, Bytes::new());
        let err = body.call(&mut ctx).await.unwrap_err();
        assert!(err.as_status().is_some());
    }
}
