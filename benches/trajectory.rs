//! Trajectory compilation with and without checkpoints.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lobtraj::engine::types::RawRecord;
use lobtraj::engine::{
    compile_trajectory, ActionLog, Checkpoints, CompileOptions, DepthCriterion, Latencies,
    LogOptions, QueuePriority, VolumeView,
};

/// Adds around a fixed mid, each followed later by a partial execute.
fn synthetic_log(orders: u64) -> ActionLog {
    let mut records: Vec<RawRecord> = Vec::with_capacity(orders as usize * 2);
    let mut add_index = vec![0usize; orders as usize + 1];
    for reference in 1..=orders {
        let (side, price) = if reference % 2 == 0 {
            (2, 10_000 - reference % 50)
        } else {
            (1, 10_001 + reference % 50)
        };
        let ts = reference * 1_000;
        add_index[reference as usize] = records.len();
        records.push([0, ts, reference, 100, price, side, 0, 0, 0]);
        if reference > 10 {
            let target = reference - 10;
            let target_side = if target % 2 == 0 { 2 } else { 1 };
            records[add_index[target as usize]][8] = records.len() as u64;
            records.push([4, ts + 1, target, 10, 0, target_side, 100, 0, 0]);
        }
    }
    ActionLog::from_records(records, LogOptions::default()).expect("synthetic log")
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_trajectory");
    group.sample_size(20);

    for &orders in &[10_000u64, 100_000] {
        let log = synthetic_log(orders);
        let targets: Vec<i64> = (0..log.len() as i64).step_by(97).collect();
        let latencies = Latencies::Uniform(5_000);
        let options = CompileOptions::default();
        let checkpoints = Checkpoints::build(&log, 4_096, QueuePriority::Arrival).expect("checkpoints");

        group.bench_with_input(BenchmarkId::new("scan", orders), &log, |b, log| {
            b.iter(|| {
                black_box(
                    compile_trajectory::<VolumeView>(log, &targets, &latencies, DepthCriterion::Level(10), options, None)
                        .expect("compile"),
                )
            });
        });
        group.bench_with_input(BenchmarkId::new("checkpointed", orders), &log, |b, log| {
            b.iter(|| {
                black_box(
                    compile_trajectory::<VolumeView>(
                        log,
                        &targets,
                        &latencies,
                        DepthCriterion::Level(10),
                        options,
                        Some(&checkpoints),
                    )
                    .expect("compile"),
                )
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile);
criterion_main!(benches);
