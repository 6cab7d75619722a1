use std::hint::black_box;

use common::Buffer2;
use coreg::{
    ChipMatchConfig, ChipMatcher, HarrisConfig, HarrisCorners, ImageSource, MemoryImage,
    NccCorrelator, PixelRect, TiePointSource,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// Smooth random texture: a sum of a few dozen plane waves.
fn texture(width: usize, height: usize, seed: u64) -> Buffer2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let waves: Vec<(f64, f64, f64, f64)> = (0..40)
        .map(|_| {
            (
                rng.random_range(-0.6..0.6),
                rng.random_range(-0.6..0.6),
                rng.random_range(0.0..std::f64::consts::TAU),
                rng.random_range(5.0..20.0),
            )
        })
        .collect();
    Buffer2::from_fn(width, height, |x, y| {
        let (x, y) = (x as f64 + 0.37, y as f64 - 0.81);
        100.0 + waves.iter().map(|(fx, fy, phase, a)| a * (fx * x + fy * y + phase).sin()).sum::<f64>()
    })
}

fn ncc_benchmarks(c: &mut Criterion) {
    let image = texture(128, 128, 1);
    let mut group = c.benchmark_group("ncc_correlate");
    for (radius, accuracy) in [(5usize, 4usize), (10, 8), (20, 16)] {
        let m = 2 * radius + 1;
        let s = 2 * (radius + accuracy) + 1;
        let master = Buffer2::from_fn(m, m, |x, y| image[(x + accuracy + 3, y + accuracy + 1)]);
        let slave = Buffer2::from_fn(s, s, |x, y| image[(x, y)]);
        let mut ncc = NccCorrelator::new();
        group.bench_with_input(BenchmarkId::from_parameter(format!("{m}x{m}_in_{s}x{s}")), &(), |b, _| {
            b.iter(|| black_box(ncc.correlate(black_box(&master), black_box(&slave))))
        });
    }
    group.finish();
}

fn harris_benchmarks(c: &mut Criterion) {
    let image = MemoryImage::single_band(texture(512, 512, 2));
    let mut corners = HarrisCorners::new(image, HarrisConfig::default()).unwrap();
    c.bench_function("harris_tile_256", |b| {
        b.iter(|| black_box(corners.tile(PixelRect::new(128, 128, 256, 256), 0).unwrap()))
    });
}

fn chip_match_benchmarks(c: &mut Criterion) {
    let master = texture(512, 512, 3);
    let slave = Buffer2::from_fn(512, 512, |x, y| master[((x + 509) % 512, (y + 2) % 512)]);
    let corners = HarrisCorners::new(
        MemoryImage::single_band(master.clone()),
        HarrisConfig {
            gaussian_sigma: 3.0,
            density: 0.003,
            ..Default::default()
        },
    )
    .unwrap();
    let mut matcher = ChipMatcher::new(
        Box::new(corners),
        Box::new(MemoryImage::single_band(master)),
        Box::new(MemoryImage::single_band(slave)),
        ChipMatchConfig {
            match_radius: 10,
            slave_accuracy: 6,
            ..Default::default()
        },
    )
    .unwrap();
    c.bench_function("chip_match_tile_256", |b| {
        b.iter(|| black_box(matcher.tie_points(PixelRect::new(128, 128, 256, 256)).unwrap().len()))
    });
}

criterion_group!(benches, ncc_benchmarks, harris_benchmarks, chip_match_benchmarks);
criterion_main!(benches);
