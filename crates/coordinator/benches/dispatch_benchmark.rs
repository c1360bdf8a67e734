use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use uplink_common::error::Result;
use uplink_common::WorkerId;
use uplink_coordinator::dispatch::{dispatch, order_by_score, Notifier};
use uplink_coordinator::ResourceIndex;
use uplink_proto::Task;

/// Accepts every notification
struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&mut self, _worker: WorkerId, _task: &Task) -> Result<()> {
        Ok(())
    }
}

/// `workers` workers each offering 8 of `pool` resource ids
fn build_index(workers: u64, pool: u64) -> ResourceIndex {
    let mut index = ResourceIndex::new();
    for w in 0..workers {
        let resources: Vec<String> = (0..8).map(|k| ((w * 3 + k) % pool).to_string()).collect();
        index.register(WorkerId(w + 1), &resources);
    }
    index
}

/// Tasks needing 1..=4 resources with varied payoffs
fn build_tasks(count: u64, pool: u64) -> Vec<Task> {
    (0..count)
        .map(|i| {
            let width = 1 + i % 4;
            let resources = (0..width).map(|k| ((i * 7 + k) % pool).to_string());
            Task::new(format!("t{i}"), 1 + (i * 37) % 100, resources).unwrap()
        })
        .collect()
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    for &(workers, tasks) in &[(10u64, 100u64), (100, 1_000), (500, 5_000)] {
        let pool = workers * 2;
        let index = build_index(workers, pool);
        let batch = build_tasks(tasks, pool);

        group.throughput(Throughput::Elements(tasks));
        group.bench_with_input(
            BenchmarkId::new("greedy_pass", format!("{workers}w_{tasks}t")),
            &batch,
            |b, batch| {
                b.iter(|| {
                    let mut index = index.clone();
                    let report = dispatch(black_box(batch), &mut index, &mut NullNotifier);
                    black_box(report.total_payoff)
                })
            },
        );
    }

    group.finish();
}

fn bench_ordering(c: &mut Criterion) {
    let mut group = c.benchmark_group("order_by_score");
    let batch = build_tasks(10_000, 1_000);

    group.bench_function("10000_tasks", |b| {
        b.iter(|| black_box(order_by_score(black_box(&batch))).len())
    });

    group.finish();
}

criterion_group!(benches, bench_dispatch, bench_ordering);
criterion_main!(benches);
