//! Argument encoding benchmarks.
//!
//! These benchmarks measure the cost of request payload encoding for the
//! three request shapes, and of building hub messages around them.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rkyv::{Archive, Deserialize, Serialize};
use stratus_codec::{ArgumentTupleCodec, MethodArgs, hub};

/// Payload used as a single-value argument.
#[derive(Debug, Clone, Default, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
struct ChatMessage {
    room: String,
    user: String,
    body: Vec<u8>,
}

fn create_message(body_size: usize) -> ChatMessage {
    ChatMessage {
        room: "general".to_string(),
        user: "benchmark_user".to_string(),
        body: vec![0xAB; body_size],
    }
}

/// Single value vs. argument tuple, encode side.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("args_encode");

    for size in [64, 1024, 10_240, 102_400] {
        group.throughput(Throughput::Bytes(size as u64));
        let single = (create_message(size),);
        let tuple = (create_message(size), 42u64, "tag".to_string());

        group.bench_with_input(BenchmarkId::new("single", size), &single, |b, args| {
            b.iter(|| black_box(args.encode_payload().unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("tuple3", size), &tuple, |b, args| {
            b.iter(|| black_box(args.encode_payload().unwrap()));
        });
    }

    group.finish();
}

/// Tuple decoding, including the lenient paths.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("args_decode");

    for size in [64, 1024, 10_240, 102_400] {
        let codec = ArgumentTupleCodec::<(ChatMessage, u64, String)>::new();
        let bytes = codec
            .encode(&(create_message(size), 42, "tag".to_string()))
            .unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));

        group.bench_with_input(BenchmarkId::new("exact", size), &bytes, |b, bytes| {
            b.iter(|| black_box(codec.decode(black_box(bytes)).unwrap()));
        });

        // A newer client sending one extra trailing argument.
        let wider = ArgumentTupleCodec::<(ChatMessage, u64, String, u32)>::new()
            .encode(&(create_message(size), 42, "tag".to_string(), 7))
            .unwrap();
        group.bench_with_input(BenchmarkId::new("skip_extra", size), &wider, |b, bytes| {
            b.iter(|| black_box(codec.decode(black_box(bytes)).unwrap()));
        });
    }

    group.finish();
}

/// Building a hub response around an encoded payload.
fn bench_hub_messages(c: &mut Criterion) {
    let mut group = c.benchmark_group("hub_message");
    group.throughput(Throughput::Elements(1));

    for size in [64, 1024, 10_240] {
        let payload = (create_message(size),).encode_payload().unwrap();

        group.bench_with_input(BenchmarkId::new("response", size), &payload, |b, payload| {
            b.iter(|| black_box(hub::response_message(1, 42, payload.as_deref())));
        });

        let message = hub::request_message(1, 42, payload.as_deref());
        group.bench_with_input(BenchmarkId::new("decode_request", size), &message, |b, m| {
            b.iter(|| black_box(hub::decode_inbound(black_box(m)).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_hub_messages);
criterion_main!(benches);
