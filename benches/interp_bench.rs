//! Interpolator benchmarks for the sfsynth render path.
//!
//! Measures the four wavetable interpolation qualities a channel can pick
//! between, at a buffer size matching real-time rendering.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sfsynth::channel::InterpMethod;
use sfsynth::interp::{render, Region};
use sfsynth::phase::Phase;

const BUFSIZE: usize = 64;

fn looping_data() -> Vec<i16> {
    (0..4096)
        .map(|i| ((i as f64 * 0.02).sin() * 16000.0) as i16)
        .collect()
}

fn bench_method(c: &mut Criterion, name: &str, method: InterpMethod) {
    let data = looping_data();
    let region = Region {
        start: 0,
        end: data.len() as u32 - 1,
        loop_start: 16,
        loop_end: data.len() as u32 - 16,
        looping: true,
    };
    let incr = Phase::incr_from_ratio(1.333);

    c.bench_function(name, |b| {
        b.iter(|| {
            let mut phase = Phase::from_index(0);
            let mut amp = 1.0;
            let mut has_looped = false;
            let mut out = [0.0f64; BUFSIZE];
            for _ in 0..200 {
                render(
                    method,
                    black_box(&data),
                    region,
                    &mut phase,
                    incr,
                    &mut amp,
                    0.0,
                    &mut has_looped,
                    &mut out,
                );
                black_box(&out);
            }
        })
    });
}

fn bench_none(c: &mut Criterion) {
    bench_method(c, "interp_none", InterpMethod::None);
}

fn bench_linear(c: &mut Criterion) {
    bench_method(c, "interp_linear", InterpMethod::Linear);
}

fn bench_cubic4th(c: &mut Criterion) {
    bench_method(c, "interp_cubic4th", InterpMethod::Cubic4th);
}

fn bench_sinc7th(c: &mut Criterion) {
    bench_method(c, "interp_sinc7th", InterpMethod::Sinc7th);
}

criterion_group!(
    interp_benches,
    bench_none,
    bench_linear,
    bench_cubic4th,
    bench_sinc7th,
);

criterion_main!(interp_benches);
