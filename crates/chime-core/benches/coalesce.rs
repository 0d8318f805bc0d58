//! Debounce queue benchmarks for chime-core.

use chime_core::{DebounceKey, DebounceQueue};
use chime_protocol::{Author, ChatMessage, UserId};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

fn bench_burst_same_key(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();

    let message = ChatMessage::new("room-1", Author::new("1", "alice"), "hello there");
    let recipients: Vec<UserId> = vec!["1".into(), "2".into()];
    let key = DebounceKey::new("1", "room-1");

    let mut group = c.benchmark_group("enqueue_burst");
    for burst in [1usize, 16, 256] {
        group.throughput(Throughput::Elements(burst as u64));
        group.bench_with_input(BenchmarkId::from_parameter(burst), &burst, |b, &burst| {
            b.iter(|| {
                let queue = DebounceQueue::new(Duration::from_secs(60));
                for _ in 0..burst {
                    queue.enqueue(
                        key.clone(),
                        message.clone(),
                        recipients.clone(),
                        |_| async {},
                    );
                }
                black_box(queue.clear())
            })
        });
    }
    group.finish();
}

fn bench_many_keys(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();

    let message = ChatMessage::new("room-1", Author::new("1", "alice"), "hello");
    let recipients: Vec<UserId> = vec!["1".into(), "2".into()];
    let keys: Vec<_> = (0..1_000)
        .map(|i| DebounceKey::new(i.to_string(), "room-1"))
        .collect();

    let mut group = c.benchmark_group("enqueue_keys");
    group.throughput(Throughput::Elements(keys.len() as u64));
    group.bench_function("1000_senders", |b| {
        b.iter(|| {
            let queue = DebounceQueue::new(Duration::from_secs(60));
            for key in &keys {
                queue.enqueue(key.clone(), message.clone(), recipients.clone(), |_| async {});
            }
            black_box(queue.clear())
        })
    });
    group.finish();
}

criterion_group!(benches, bench_burst_same_key, bench_many_keys);
criterion_main!(benches);
