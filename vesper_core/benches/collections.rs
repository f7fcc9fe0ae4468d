//! Collection Performance Benchmarks
//!
//! Measures the structures that sit on the event handler's hot path:
//!
//! 1. **Hash map**: descriptor lookup keyed by `fd + 1`, insert/remove churn
//! 2. **Priority queue**: timer insert, re-prioritize and expiry

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use vesper_core::{PriorityQueue, SimpleHashMap};

// =============================================================================
// Hash Map Benchmarks
// =============================================================================

fn bench_hash_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_map");

    for size in [16usize, 256, 4096] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("lookup_hit", size), &size, |b, &size| {
            let mut map: SimpleHashMap<usize, usize> = SimpleHashMap::new(16);
            for fd in 0..size {
                map.lookup_or_insert(fd + 1, (fd + 1) as u32, || fd);
            }
            b.iter(|| {
                let mut sum = 0;
                for fd in 0..size {
                    if let Some(entry) = map.lookup(fd + 1, (fd + 1) as u32) {
                        sum += entry.value;
                    }
                }
                black_box(sum)
            });
        });

        group.bench_with_input(BenchmarkId::new("insert_remove", size), &size, |b, &size| {
            b.iter(|| {
                let mut map: SimpleHashMap<usize, usize> = SimpleHashMap::new(16);
                for fd in 0..size {
                    map.lookup_or_insert(fd + 1, (fd + 1) as u32, || fd);
                }
                for fd in 0..size {
                    map.remove(fd + 1, (fd + 1) as u32);
                }
                black_box(map.occupancy())
            });
        });
    }

    group.finish();
}

// =============================================================================
// Priority Queue Benchmarks
// =============================================================================

fn bench_priority_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue");

    for size in [16u64, 256, 4096] {
        group.throughput(Throughput::Elements(size));

        group.bench_with_input(BenchmarkId::new("insert_drain", size), &size, |b, &size| {
            b.iter(|| {
                let mut queue: PriorityQueue<i64, u64> = PriorityQueue::new();
                for port in 1..=size {
                    queue.insert((port * 7919 % size) as i64, port);
                }
                while !queue.is_empty() {
                    black_box(queue.remove_minimum());
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("reschedule", size), &size, |b, &size| {
            let mut queue: PriorityQueue<i64, u64> = PriorityQueue::new();
            for port in 1..=size {
                queue.insert(port as i64, port);
            }
            let mut tick = 0i64;
            b.iter(|| {
                tick += 1;
                for port in 1..=size {
                    queue.insert_or_change_priority(tick + (port as i64 * 31) % 97, port);
                }
                black_box(queue.minimum().value)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_hash_map, bench_priority_queue);
criterion_main!(benches);
