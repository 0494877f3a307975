use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use ebssnap_core::{CorrelationId, Provenance, RemoteError, Resource, Tag, Volume, provenance_tags, snapshot_tag_set, tag_info};
use ebssnap_infra::jobs::{Dispatcher, Job, JobOutcome, RetryPolicy, RunContext};
use ebssnap_infra::remote::{CallerIdentity, InMemoryEc2};
use ebssnap_infra::{InMemoryEventSink, RunConfig, SnapshotRunner};
use std::sync::Arc;

fn provenance() -> Provenance {
    Provenance {
        version: "0.1.0".to_string(),
        host: "bench".to_string(),
        user: "bench".to_string(),
        uid: 1000,
        euid: 1000,
    }
}

fn ctx() -> Arc<RunContext> {
    Arc::new(RunContext {
        region: "us-east-1".to_string(),
        description: "bench".to_string(),
        correlation_id: CorrelationId::new(),
        identity: CallerIdentity::default(),
        provenance: provenance(),
    })
}

fn volumes(n: usize) -> Vec<Result<Job, RemoteError>> {
    (0..n)
        .map(|i| Ok(Resource::Volume(Volume::new(format!("vol-{i}"), "us-east-1a", Utc::now()))))
        .collect()
}

/// Pipeline overhead with a no-op handler: queue handoff, acks, liveness polls.
fn bench_dispatch_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_throughput");
    group.sample_size(20);

    let jobs = 1_000;
    group.throughput(Throughput::Elements(jobs as u64));
    for concurrency in [1usize, 4, 16] {
        group.bench_with_input(
            BenchmarkId::new("noop_handler", concurrency),
            &concurrency,
            |b, &concurrency| {
                let ctx = ctx();
                let handler = Arc::new(|_: &Job, _: &RunContext| JobOutcome::Success);
                b.iter(|| {
                    let outcome = Dispatcher::new(concurrency)
                        .dispatch(volumes(jobs), Arc::clone(&ctx), Arc::clone(&handler))
                        .unwrap();
                    black_box(outcome);
                });
            },
        );
    }

    group.finish();
}

/// Full create run against the in-memory backend, including tag shaping and events.
fn bench_create_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_run");
    group.sample_size(10);

    for count in [100usize, 1_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("in_memory", count), &count, |b, &count| {
            b.iter(|| {
                let ec2 = Arc::new(InMemoryEc2::new());
                for i in 0..count {
                    ec2.add_volume(
                        Volume::new(format!("vol-{i}"), "us-east-1a", Utc::now())
                            .with_tags(vec![Tag::new("Name", format!("disk-{i}"))]),
                    );
                }
                let runner = SnapshotRunner::new(
                    RunConfig::new("us-east-1"),
                    Arc::clone(&ec2),
                    Arc::clone(&ec2),
                    Arc::new(InMemoryEventSink::new()),
                )
                .with_retry_policy(RetryPolicy::immediate(10))
                .with_provenance(provenance());
                black_box(runner.create_snapshots(&[]).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_tag_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("tag_codec");
    let provenance = provenance();
    let correlation_id = CorrelationId::new();

    for resource_tags in [0usize, 10, 50] {
        let tags: Vec<Tag> = (0..resource_tags)
            .map(|i| Tag::new(format!("key-{i}"), format!("value-{i}")))
            .collect();
        group.bench_with_input(
            BenchmarkId::new("snapshot_tag_set", resource_tags),
            &tags,
            |b, tags| {
                b.iter(|| {
                    let set = snapshot_tag_set(
                        provenance_tags(black_box("bench"), correlation_id, &provenance),
                        tags,
                    );
                    black_box(tag_info(&set));
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_dispatch_throughput,
    bench_create_run,
    bench_tag_codec
);
criterion_main!(benches);
