// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use thingbeat::audio::resample::resample;
use thingbeat::audio::{AudioBuffer, OnsetDetector, Quantizer, WavCodec};
use thingbeat::clock::{loop_duration_seconds, BarsPerLoop};

/// Leading silence followed by a three-partial tone, like a generated clip.
fn generate_clip(silence_seconds: f32, duration_seconds: f32, sample_rate: u32) -> AudioBuffer {
    let silence = (silence_seconds * sample_rate as f32) as usize;
    let total = (duration_seconds * sample_rate as f32) as usize;
    let plane: Vec<f32> = (0..total)
        .map(|i| {
            if i < silence {
                return 0.0;
            }
            let t = i as f32 / sample_rate as f32;
            0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
                + 0.2 * (2.0 * std::f32::consts::PI * 880.0 * t).sin()
                + 0.1 * (2.0 * std::f32::consts::PI * 1320.0 * t).sin()
        })
        .collect();
    AudioBuffer::new(sample_rate, vec![plane.clone(), plane]).unwrap()
}

fn benchmark_quantize(c: &mut Criterion) {
    let mut group = c.benchmark_group("quantize");
    let quantizer = Quantizer::default();

    for (bpm, bars) in [(100, BarsPerLoop::Two), (120, BarsPerLoop::Four), (90, BarsPerLoop::Eight)] {
        let target = loop_duration_seconds(bars, bpm);
        let clip = generate_clip(0.4, target as f32 * 0.8, 44100);
        group.bench_with_input(
            BenchmarkId::new("loop", format!("{bpm}bpm_{bars}bars")),
            &clip,
            |b, clip| b.iter(|| quantizer.quantize(black_box(clip), target, true).unwrap()),
        );
    }
    group.finish();
}

fn benchmark_onset(c: &mut Criterion) {
    let mut group = c.benchmark_group("onset");
    let clip = generate_clip(2.0, 10.0, 44100);

    for window in [256, 512, 2048] {
        let detector = OnsetDetector::new(0.02, window);
        group.bench_with_input(BenchmarkId::new("window", window), &clip, |b, clip| {
            b.iter(|| detector.detect_frame(black_box(clip)))
        });
    }
    group.finish();
}

fn benchmark_wav(c: &mut Criterion) {
    let mut group = c.benchmark_group("wav");
    let clip = generate_clip(0.0, 4.0, 44100);
    let bytes = WavCodec::encode(&clip).unwrap();

    group.bench_function("encode", |b| b.iter(|| WavCodec::encode(black_box(&clip)).unwrap()));
    group.bench_function("decode", |b| b.iter(|| WavCodec::decode(black_box(&bytes)).unwrap()));
    group.finish();
}

fn benchmark_resample(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample");
    group.sample_size(20);

    for (name, source_rate, target_rate) in [
        ("48kHz_to_44.1kHz", 48000, 44100),
        ("44.1kHz_to_48kHz", 44100, 48000),
        ("24kHz_to_44.1kHz", 24000, 44100),
    ] {
        let clip = generate_clip(0.0, 1.0, source_rate);
        group.bench_function(name, |b| {
            b.iter(|| resample(black_box(&clip), target_rate).unwrap())
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_quantize,
    benchmark_onset,
    benchmark_wav,
    benchmark_resample
);
criterion_main!(benches);
