//! End-to-end tests on synthetic scenes with known changes.
//!
//! A bitemporal scene is built from a deterministic pseudo-random texture:
//! the second acquisition is a per-band linear transform of the first plus
//! small noise, except for a block whose content was replaced.

use approx::assert_relative_eq;
use changedet_algorithms::imagery::{
    db_to_linear, omnibus, radcal_pair, radcalbatch, run_mad, ImadParams, OmnibusParams,
    RadcalParams,
};
use changedet_algorithms::statistics::{chi2_survival, reduce, Reducer};
use changedet_core::{ErrorKind, GeoTransform, Image, Mask, Raster};

const SIZE: usize = 50;
const GAINS: [f64; 3] = [1.5, 0.8, 1.2];
const OFFSETS: [f64; 3] = [10.0, -5.0, 3.0];

/// Uniform values in [0, 1) from a 64-bit LCG
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }
}

fn changed(row: usize, col: usize) -> bool {
    (10..20).contains(&row) && (30..40).contains(&col)
}

fn raster(data: Vec<f64>) -> Raster<f64> {
    let mut r = Raster::from_vec(data, SIZE, SIZE).unwrap();
    r.set_transform(GeoTransform::new(600_000.0, 4_200_000.0, 30.0, -30.0));
    r
}

/// (first acquisition, second acquisition)
fn scene(seed: u64) -> (Image, Image) {
    let mut rng = Lcg(seed);
    let mut first = Vec::new();
    let mut second = Vec::new();
    for b in 0..3 {
        let mut x = Vec::with_capacity(SIZE * SIZE);
        let mut y = Vec::with_capacity(SIZE * SIZE);
        for i in 0..SIZE * SIZE {
            let v = 100.0 * rng.next();
            let noise = rng.next() - 0.5;
            let replaced = 100.0 * rng.next();
            x.push(v);
            y.push(if changed(i / SIZE, i % SIZE) {
                replaced
            } else {
                GAINS[b] * v + OFFSETS[b] + noise
            });
        }
        first.push(raster(x));
        second.push(raster(y));
    }
    (
        Image::from_bands(first).unwrap().with_id("scene-a"),
        Image::from_bands(second).unwrap().with_id("scene-b"),
    )
}

#[test]
fn imad_separates_changed_block() {
    let (a, b) = scene(7);
    let result = run_mad(&a, &b, ImadParams { iterations: 20, ..Default::default() }).unwrap();

    assert_eq!(result.iterations(), 20);
    assert!(result.rhos()[0] > 0.99, "rhos: {:?}", result.rhos());

    let changed_mask = Mask::from_array(
        &result.chi2,
        ndarray::Array2::from_shape_fn((SIZE, SIZE), |(r, c)| changed(r, c)),
    )
    .unwrap();
    let stable_mask = Mask::from_array(
        &result.chi2,
        ndarray::Array2::from_shape_fn((SIZE, SIZE), |(r, c)| !changed(r, c)),
    )
    .unwrap();

    let mean_changed = reduce(&result.chi2, Reducer::Mean, Some(&changed_mask)).unwrap();
    let mean_stable = reduce(&result.chi2, Reducer::Mean, Some(&stable_mask)).unwrap();
    assert!(
        mean_changed > 100.0 * mean_stable,
        "changed {} vs stable {}",
        mean_changed,
        mean_stable
    );

    // Unchanged pixels follow chi-square(3): mean near 3
    assert!(mean_stable > 1.5 && mean_stable < 6.0, "stable mean {}", mean_stable);

    let no_change = chi2_survival(&result.chi2, 3).unwrap();
    let max_changed = reduce(&no_change, Reducer::Max, Some(&changed_mask)).unwrap();
    assert!(max_changed < 1e-6);
}

#[test]
fn radcal_recovers_gains_from_invariant_pixels() {
    let (a, b) = scene(11);
    let params = RadcalParams {
        imad: ImadParams { iterations: 20, ..Default::default() },
        ..Default::default()
    };
    let result = radcal_pair(&a, &b, params).unwrap();

    assert!(result.invariant_pixels >= 30);
    for r in 0..SIZE {
        for c in 0..SIZE {
            if changed(r, c) {
                assert!(!result.mask.get(r, c), "changed pixel ({}, {}) marked invariant", r, c);
            }
        }
    }

    for (k, coef) in result.coefficients.iter().enumerate() {
        assert_eq!(coef.band, k);
        assert_relative_eq!(coef.slope, 1.0 / GAINS[k], max_relative = 0.02);
        assert_relative_eq!(coef.intercept, -OFFSETS[k] / GAINS[k], epsilon = 1.5);
        assert!(coef.correlation > 0.999);
    }

    // Normalized target matches the reference on unchanged pixels
    let stable = Mask::from_array(
        a.band(0).unwrap(),
        ndarray::Array2::from_shape_fn((SIZE, SIZE), |(r, c)| !changed(r, c)),
    )
    .unwrap();
    for k in 0..3 {
        let diff = a
            .band(k)
            .unwrap()
            .zip_map(result.normalized.band(k).unwrap(), |x, y| (x - y).abs())
            .unwrap();
        let mean_diff = reduce(&diff, Reducer::Mean, Some(&stable)).unwrap();
        assert!(mean_diff < 1.0, "band {} mean |diff| {}", k, mean_diff);
    }
    assert_eq!(result.normalized.id(), Some("scene-b"));
}

#[test]
fn radcalbatch_orders_reference_first_and_logs() {
    let (a, b) = scene(13);
    let c = b.map_bands(|v| 0.9 * v + 2.0).with_id("scene-c");
    let params = RadcalParams {
        imad: ImadParams { iterations: 10, ..Default::default() },
        ..Default::default()
    };

    let batch = radcalbatch(&[a.clone(), b, c], 0, params).unwrap();
    let ids: Vec<_> = batch.images.iter().map(|i| i.id().unwrap()).collect();
    assert_eq!(ids, ["scene-a", "scene-b", "scene-c"]);
    assert_eq!(batch.targets.len(), 2);

    // Reference passes through untouched
    assert_eq!(batch.images[0].band(2).unwrap().data(), a.band(2).unwrap().data());

    assert_eq!(batch.log[1], "REFERENCE: scene-a");
    assert_eq!(batch.log[2], "TARGETS:");
    assert_eq!(batch.log[3], "scene-b");
    assert_eq!(batch.log[4], "  iterations: 10");
    assert!(batch.log[5].starts_with("  invariant pixels: "));
    assert!(batch.log[6].starts_with("  band 1: slope "));
    assert_eq!(batch.log.iter().filter(|l| l.contains("band 3:")).count(), 2);
}

#[test]
fn radcal_reports_insufficient_invariant_pixels() {
    let (a, b) = scene(19);
    let params = RadcalParams {
        min_invariant_pixels: SIZE * SIZE,
        imad: ImadParams { iterations: 5, ..Default::default() },
        ..Default::default()
    };
    let err = radcal_pair(&a, &b, params).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Numerical);
}

#[test]
fn omnibus_on_decibel_series() {
    // VV/VH in dB; a block brightens by 8 dB from the fourth acquisition on
    let series: Vec<Image> = (1..=6)
        .map(|t| {
            let band = |base: f64, ripple: f64| {
                raster(
                    (0..SIZE * SIZE)
                        .map(|i| {
                            let (r, c) = (i / SIZE, i % SIZE);
                            let jitter = ripple * (((t * 3 + r * 5 + c * 7) % 5) as f64 - 2.0) / 2.0;
                            let step = if changed(r, c) && t >= 4 { 8.0 } else { 0.0 };
                            base + step + jitter
                        })
                        .collect(),
                )
            };
            let db = Image::from_named_bands(
                vec!["VV".into(), "VH".into()],
                vec![band(-8.0, 0.05), band(-15.0, 0.05)],
            )
            .unwrap();
            db_to_linear(&db)
        })
        .collect();

    let maps = omnibus(&series, OmnibusParams::default()).unwrap();
    for r in 0..SIZE {
        for c in 0..SIZE {
            let expect = if changed(r, c) { 4 } else { 0 };
            assert_eq!(maps.smap.get(r, c).unwrap(), expect);
            assert_eq!(maps.cmap.get(r, c).unwrap(), expect);
            assert_eq!(maps.fmap.get(r, c).unwrap(), u16::from(changed(r, c)));
        }
    }
    let flagged: Vec<usize> = maps
        .bmap
        .iter()
        .map(|b| b.data().iter().filter(|&&v| v == 1).count())
        .collect();
    assert_eq!(flagged, vec![0, 0, 100, 0, 0]);
    assert!(maps.cmap.transform().same_grid(series[0].transform()));

    // Re-running gives identical maps
    let again = omnibus(&series, OmnibusParams::default()).unwrap();
    assert_eq!(again.cmap.data(), maps.cmap.data());
}
