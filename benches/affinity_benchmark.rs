//! Performance benchmarks for numa-affinity
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use numa_affinity::affinity::{classify_mask, detect_core_collisions, parse_cpu_list, AffinityMask};
use numa_affinity::policy::{recommend_assignment, recommend_for_process, WorkloadClass};
use numa_affinity::rules::RuleStore;
use numa_affinity::system::{ProcessRecord, ProcessorTopology};
use tempfile::TempDir;

/// Build a peer snapshot spread over the machine
fn create_peers(count: usize, logical: usize) -> Vec<ProcessRecord> {
    (0..count)
        .map(|i| {
            let start = (i * 4) % logical.min(64).saturating_sub(4).max(1);
            ProcessRecord {
                pid: 1000 + i as u32,
                name: if i % 3 == 0 { "capital".to_string() } else { format!("worker{}", i) },
                session_id: (i % 16) as u32,
                current_affinity: AffinityMask::from_bits(0xF << start),
            }
        })
        .collect()
}

fn bench_cpu_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu_list");

    for list in ["0-3", "0,1,4,5,8-11,16,20-23", "0-8191"] {
        group.bench_with_input(BenchmarkId::from_parameter(list), list, |b, list| {
            b.iter(|| black_box(parse_cpu_list(list)))
        });
    }

    group.finish();
}

fn bench_mask_ops(c: &mut Criterion) {
    let topology = ProcessorTopology::from_counts(32, 64, 4);
    let cpus: Vec<usize> = (0..64).step_by(3).collect();

    c.bench_function("mask_from_cpus", |b| {
        b.iter(|| black_box(AffinityMask::from_cpus(cpus.iter().copied())))
    });

    c.bench_function("classify_mask", |b| {
        let mask = AffinityMask::from_bits(0x00F0_F00F_0F00_F0F0);
        b.iter(|| black_box(classify_mask(mask, &topology)))
    });

    c.bench_function("detect_core_collisions", |b| {
        b.iter(|| black_box(detect_core_collisions(&cpus, 2)))
    });
}

fn bench_recommend(c: &mut Criterion) {
    let mut group = c.benchmark_group("recommend");
    let topology = ProcessorTopology::from_counts(32, 64, 4);

    for peers in [10, 100, 1000] {
        let snapshot = create_peers(peers, topology.logical_processors);
        let target = snapshot[0].clone();

        group.bench_with_input(BenchmarkId::new("least_loaded", peers), &snapshot, |b, snapshot| {
            b.iter(|| black_box(recommend_assignment(&topology, WorkloadClass::ApplicationServer, snapshot)))
        });
        group.bench_with_input(BenchmarkId::new("session_aware", peers), &snapshot, |b, snapshot| {
            b.iter(|| black_box(recommend_for_process(&topology, &target, snapshot)))
        });
    }

    group.finish();
}

fn bench_rule_lookup(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = RuleStore::with_defaults(
        dir.path().join("rules.txt"),
        dir.path().join("machine"),
        dir.path().join("user"),
    );
    for i in 0..200 {
        store
            .save_to_table(&format!("proc{}", i), AffinityMask::from_bits(0xF << (i % 60)))
            .unwrap();
    }

    c.bench_function("rule_lookup_200", |b| b.iter(|| black_box(store.get("proc150.exe"))));
    c.bench_function("rule_resolve_all_200", |b| b.iter(|| black_box(store.resolve_all())));
}

criterion_group!(benches, bench_cpu_list, bench_mask_ops, bench_recommend, bench_rule_lookup);

criterion_main!(benches);
