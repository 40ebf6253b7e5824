//! End-to-end voice rendering benchmarks: single-voice throughput and
//! full-polyphony mixdown through a `VoicePool`.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sfsynth::channel::{Channel, InterpMethod};
use sfsynth::constants::{BUFSIZE, DEFAULT_POLYPHONY};
use sfsynth::gen::GenType;
use sfsynth::sample::{Sample, SampleTypeFlags};
use sfsynth::{Voice, VoicePool};
use std::sync::Arc;

fn looping_sample() -> Arc<Sample> {
    let data: Vec<i16> = (0..8192)
        .map(|i| ((i as f64 * 0.015).sin() * 12000.0) as i16)
        .collect();
    Arc::new(Sample {
        name: "bench".into(),
        data,
        start: 0,
        end: 8191,
        loop_start: 512,
        loop_end: 7680,
        original_key: 69,
        pitch_correction: 0,
        sample_rate: 44100,
        sample_type: SampleTypeFlags::MONO,
        loop_amplitude_bound: 1.0,
    })
}

fn started_voice(key: u8) -> Voice {
    let channel = Channel::new(0);
    let mut v = Voice::new();
    v.configure(looping_sample(), &channel, key, 100, 0, 44100.0, 1.0);
    v.set_local_gen(GenType::SampleMode, 1);
    v.start();
    v
}

fn bench_single_voice_render(c: &mut Criterion) {
    let mut v = started_voice(60);
    let mut left = [0.0f64; BUFSIZE];
    let mut right = [0.0f64; BUFSIZE];

    c.bench_function("voice_render_single", |b| {
        b.iter(|| {
            left = [0.0; BUFSIZE];
            right = [0.0; BUFSIZE];
            v.render(
                black_box(&mut left),
                black_box(&mut right),
                None,
                None,
                InterpMethod::Linear,
            );
        })
    });
}

fn bench_single_voice_render_with_sends(c: &mut Criterion) {
    let mut v = started_voice(60);
    let mut left = [0.0f64; BUFSIZE];
    let mut right = [0.0f64; BUFSIZE];
    let mut reverb = [0.0f64; BUFSIZE];
    let mut chorus = [0.0f64; BUFSIZE];

    c.bench_function("voice_render_single_with_sends", |b| {
        b.iter(|| {
            left = [0.0; BUFSIZE];
            right = [0.0; BUFSIZE];
            reverb = [0.0; BUFSIZE];
            chorus = [0.0; BUFSIZE];
            v.render(
                black_box(&mut left),
                black_box(&mut right),
                Some(&mut reverb),
                Some(&mut chorus),
                InterpMethod::Sinc7th,
            );
        })
    });
}

/// Fills a pool to full polyphony and mixes every active voice into one
/// stereo buffer, the per-buffer cost `Synth::render_frame` pays once the
/// bank is loaded and notes are held.
fn bench_full_polyphony_mixdown(c: &mut Criterion) {
    let mut pool = VoicePool::new(DEFAULT_POLYPHONY);
    let channel = Channel::new(0);
    let sample = looping_sample();
    for i in 0..pool.len() {
        let (idx, id) = pool.allocate();
        let key = 36 + (i % 48) as u8;
        pool.get_mut(idx)
            .configure(sample.clone(), &channel, key, 100, id, 44100.0, 1.0);
        pool.get_mut(idx).set_local_gen(GenType::SampleMode, 1);
        pool.get_mut(idx).start();
    }

    let mut left = [0.0f64; BUFSIZE];
    let mut right = [0.0f64; BUFSIZE];

    c.bench_function("voice_pool_full_polyphony_mixdown", |b| {
        b.iter(|| {
            left = [0.0; BUFSIZE];
            right = [0.0; BUFSIZE];
            for v in pool.iter_mut() {
                if !v.is_finished() {
                    v.render(&mut left, &mut right, None, None, InterpMethod::Linear);
                }
            }
            black_box((&left, &right));
        })
    });
}

criterion_group!(
    synth_benches,
    bench_single_voice_render,
    bench_single_voice_render_with_sends,
    bench_full_polyphony_mixdown,
);

criterion_main!(synth_benches);
