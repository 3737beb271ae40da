//! Benchmarks for the change-detection engines

use changedet_algorithms::imagery::{omnibus, run_mad, ImadParams, OmnibusParams};
use changedet_algorithms::statistics::chi2_survival;
use changedet_core::{GeoTransform, Image, Raster};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn create_band(size: usize, seed: usize, scale: f64) -> Raster<f64> {
    let data = (0..size * size)
        .map(|i| {
            let (row, col) = (i / size, i % size);
            1.0 + scale * ((row * 7 + col * 13 + seed * 31) % 200) as f64
                + ((row * col + seed) % 17) as f64 * 0.1
        })
        .collect();
    let mut r = Raster::from_vec(data, size, size).unwrap();
    r.set_transform(GeoTransform::new(0.0, size as f64, 1.0, -1.0));
    r
}

fn create_image(size: usize, seed: usize, nbands: usize, scale: f64) -> Image {
    Image::from_bands((0..nbands).map(|b| create_band(size, seed + b, scale)).collect()).unwrap()
}

fn bench_imad(c: &mut Criterion) {
    let mut group = c.benchmark_group("imagery/imad");
    group.sample_size(10);
    for size in [128, 256, 512] {
        let a = create_image(size, 0, 4, 1.0);
        let b = create_image(size, 3, 4, 1.1);
        let params = ImadParams { iterations: 10, ..Default::default() };
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bench, _| {
            bench.iter(|| run_mad(black_box(&a), black_box(&b), params).unwrap())
        });
    }
    group.finish();
}

fn bench_omnibus(c: &mut Criterion) {
    let mut group = c.benchmark_group("imagery/omnibus");
    group.sample_size(10);
    for k in [4, 8, 16] {
        let series: Vec<Image> = (0..k).map(|t| create_image(256, t % 3, 2, 0.01)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(k), &k, |bench, _| {
            bench.iter(|| omnibus(black_box(&series), OmnibusParams::default()).unwrap())
        });
    }
    group.finish();
}

fn bench_chi2_survival(c: &mut Criterion) {
    let mut group = c.benchmark_group("statistics/chi2_survival");
    for size in [256, 1024] {
        let chi2 = create_band(size, 5, 0.05);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bench, _| {
            bench.iter(|| chi2_survival(black_box(&chi2), 4).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_imad, bench_omnibus, bench_chi2_survival);
criterion_main!(benches);
