use std::hint::black_box;
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use sim_metrics::Metrics;

fn record_counters(c: &mut Criterion) {
    let m = Metrics::new();
    c.bench_function("registry record sent+success", |b| {
        b.iter(|| {
            m.record_sent();
            m.record_success();
        });
    });
}

fn record_response_time(c: &mut Criterion) {
    let m = Metrics::new();
    c.bench_function("registry record_response_time", |b| {
        b.iter(|| m.record_response_time(black_box(Duration::from_millis(42))));
    });
}

fn snapshot_on_full_window(c: &mut Criterion) {
    let m = Metrics::new();
    for ms in 0..1_000 {
        m.record_response_time(Duration::from_millis(ms % 200));
        m.record_request_latency(Duration::from_millis(ms % 50));
        m.incr_group_active(if ms % 2 == 0 { "a" } else { "b" });
    }
    c.bench_function("registry snapshot on a full window", |b| {
        b.iter(|| black_box(m.snapshot()));
    });
}

criterion_group!(benches, record_counters, record_response_time, snapshot_on_full_window);
criterion_main!(benches);
