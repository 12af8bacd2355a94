//! Concurrent load benchmarks.
//!
//! Measures priority queue operations, cache set/get under eviction and
//! scheduler throughput for short tasks.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

use exec_core::cache::{CacheConfig, CacheStore, SetOptions};
use exec_core::scheduler::{Priority, PriorityQueue, Scheduler, SchedulerConfig, TaskOptions};

fn priority_for(i: u64) -> Priority {
    Priority::from((i % 3) as u8)
}

fn bench_priority_queue_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue_push_pop");

    for (name, queue_size) in [("empty", 0u64), ("hundred", 100), ("ten_thousand", 10_000)] {
        let mut queue: PriorityQueue<u64> = PriorityQueue::new();
        for i in 0..queue_size {
            queue.push(i, priority_for(i));
        }

        group.throughput(Throughput::Elements(1));
        group.bench_function(BenchmarkId::new("push_pop", name), |b| {
            let mut id = queue_size;
            b.iter(|| {
                queue.push(black_box(id), priority_for(id));
                id += 1;
                black_box(queue.pop());
            })
        });
    }

    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");
    let value = json!({"id": 42, "tags": ["a", "b", "c"], "payload": "x".repeat(256)});

    for max_entries in [100usize, 1000] {
        let cache = CacheStore::new(CacheConfig {
            max_entries,
            ..Default::default()
        });

        group.throughput(Throughput::Elements(1));
        group.bench_function(BenchmarkId::new("set_with_eviction", max_entries), |b| {
            let mut i = 0u64;
            b.iter(|| {
                cache.set(format!("key-{i}"), value.clone(), SetOptions::default());
                i += 1;
            })
        });

        group.bench_function(BenchmarkId::new("get_hit", max_entries), |b| {
            cache.set("hot", value.clone(), SetOptions::ttl(Duration::from_secs(3600)));
            b.iter(|| black_box(cache.get("hot")))
        });
    }

    group.finish();
}

fn bench_scheduler_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_throughput");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    for (limit, tasks) in [(1usize, 100u64), (4, 100), (16, 1000)] {
        group.throughput(Throughput::Elements(tasks));
        group.bench_function(BenchmarkId::new(format!("limit_{limit}"), tasks), |b| {
            b.iter(|| {
                runtime.block_on(async {
                    let scheduler = Scheduler::new(SchedulerConfig::fixed("bench", limit));
                    let handles: Vec<_> = (0..tasks)
                        .map(|i| {
                            scheduler.add_task(
                                move || async move { Ok::<_, String>(black_box(i * 2)) },
                                TaskOptions::priority(priority_for(i)),
                            )
                        })
                        .collect();
                    for handle in handles {
                        black_box(handle.await.unwrap());
                    }
                })
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_priority_queue_push_pop,
    bench_cache,
    bench_scheduler_throughput
);
criterion_main!(benches);
