//! Codec benchmarks for tether-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;
use tether_protocol::{codec, Event};

fn bench_encode_typing(c: &mut Criterion) {
    let event = Event::typing_start(
        "3f7c9a52-channel",
        "6b1e44d0-user",
        json!({"id": "6b1e44d0-user", "username": "alice", "displayName": "Alice"}),
    );
    let size = codec::encode(&event).unwrap().len();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(size as u64));
    group.bench_function("typing_start", |b| {
        b.iter(|| codec::encode(black_box(&event)))
    });
    group.finish();
}

fn bench_decode_commands(c: &mut Criterion) {
    let subscribe = r#"{"type":"SUBSCRIBE","data":{"channelId":"3f7c9a52-channel"}}"#;
    let signal = r#"{"type":"VOICE_SIGNAL","data":{"channelId":"v1","targetUserId":"u2","signalType":"ice-candidate","signal":{"candidate":"candidate:1 1 udp 2122260223 10.0.0.2 53421 typ host","sdpMid":"0"}}}"#;

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(subscribe.len() as u64));
    group.bench_function("subscribe", |b| {
        b.iter(|| codec::decode_command(black_box(subscribe)))
    });
    group.throughput(Throughput::Bytes(signal.len() as u64));
    group.bench_function("voice_signal", |b| {
        b.iter(|| codec::decode_command(black_box(signal)))
    });
    group.finish();
}

criterion_group!(benches, bench_encode_typing, bench_decode_commands);
criterion_main!(benches);
