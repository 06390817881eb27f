use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use sim_curve::{BehaviorPoint, Bounds, CurveFn};

fn smooth_curve() -> CurveFn {
    CurveFn::new(
        Bounds { min_x: 0.0, max_x: 60_000.0, min_y: 0.0, max_y: 1.0 },
        vec![
            BehaviorPoint::curve(0.0, 0.05),
            BehaviorPoint::curve(0.2, 0.4),
            BehaviorPoint::curve(0.5, 0.1),
            BehaviorPoint::curve(0.8, 0.6),
            BehaviorPoint::curve(1.0, 0.3),
        ],
    )
}

fn eval_single_point(c: &mut Criterion) {
    let curve = smooth_curve();
    c.bench_function("curve eval single point", |b| {
        b.iter(|| curve.eval(black_box(12_345.0)));
    });
}

fn eval_sweep(c: &mut Criterion) {
    let curve = smooth_curve();
    c.bench_function("curve eval 1000-point sweep", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for i in 0..1000 {
                acc += curve.eval(black_box(i as f64 * 60.0));
            }
            acc
        });
    });
}

fn construct_curve(c: &mut Criterion) {
    c.bench_function("curve construction (tangent precompute)", |b| {
        b.iter(|| black_box(smooth_curve()));
    });
}

criterion_group!(benches, eval_single_point, eval_sweep, construct_curve);
criterion_main!(benches);
