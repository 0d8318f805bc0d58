//! Codec benchmarks for chime-protocol.

use chime_protocol::{codec, Author, ChatMessage, Frame, NotifyPayload};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn chat_frame(content_len: usize) -> Frame {
    let payload = NotifyPayload {
        room_id: "room-1".into(),
        from_uid: "1".into(),
        message: ChatMessage::new("room-1", Author::new("1", "alice"), "x".repeat(content_len)),
        uids: (1..=8).map(|i| i.to_string().into()).collect(),
    };
    Frame::ChatReceive(payload.receive_event_for(&"2".into()))
}

fn bench_encode_chat(c: &mut Criterion) {
    let frame = chat_frame(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("chat_64B", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.finish();
}

fn bench_decode_chat(c: &mut Criterion) {
    let encoded = codec::encode(&chat_frame(64)).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("chat_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let frame = chat_frame(1024);

    c.bench_function("roundtrip_chat_1KiB", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(benches, bench_encode_chat, bench_decode_chat, bench_roundtrip);
criterion_main!(benches);
