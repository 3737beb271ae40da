//! Relative radiometric normalization on IR-MAD invariant pixels
//!
//! Pixels whose IR-MAD chi-square statistic is small are taken as
//! radiometrically invariant ("no change"). For each band the target is
//! regressed onto the reference over those pixels by orthogonal regression,
//! which treats both images as noisy, and the fitted line maps the whole
//! target band into the reference's radiometry (Canty & Nielsen 2008).

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::imagery::mad::{run_mad, ImadParams};
use crate::statistics::chi2_cdf;
use changedet_core::raster::{Image, Mask, Raster};
use changedet_core::{Algorithm, Error, Result};

/// Parameters for radiometric normalization
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RadcalParams {
    /// A pixel is invariant when `chi2_cdf(chi2, p) < significance`
    pub significance: f64,
    /// Minimum number of invariant pixels per band for a regression
    pub min_invariant_pixels: usize,
    /// IR-MAD settings (iterations, region)
    pub imad: ImadParams,
}

impl Default for RadcalParams {
    fn default() -> Self {
        Self {
            significance: 0.05,
            min_invariant_pixels: 30,
            imad: ImadParams::default(),
        }
    }
}

impl RadcalParams {
    fn validate(&self) -> Result<()> {
        if !(self.significance > 0.0 && self.significance < 1.0) {
            return Err(Error::invalid_parameter(
                "significance",
                self.significance,
                "must lie strictly between 0 and 1",
            ));
        }
        if self.min_invariant_pixels < 2 {
            return Err(Error::invalid_parameter(
                "min_invariant_pixels",
                self.min_invariant_pixels,
                "a regression needs at least 2 pixels",
            ));
        }
        Ok(())
    }
}

/// Orthogonal regression coefficients of one band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandCalibration {
    /// Band index (0-based)
    pub band: usize,
    pub slope: f64,
    pub intercept: f64,
    /// Pearson correlation over the invariant pixels
    pub correlation: f64,
    /// Number of invariant pixels used
    pub n_pixels: usize,
}

/// Normalization of one target image against a reference
#[derive(Debug, Clone)]
pub struct RadcalResult {
    /// Coefficients per band, in band order
    pub coefficients: Vec<BandCalibration>,
    /// Target mapped into the reference's radiometry
    pub normalized: Image,
    /// Invariant-pixel mask
    pub mask: Mask,
    /// Number of invariant pixels
    pub invariant_pixels: usize,
    /// IR-MAD iterations run
    pub iterations: usize,
    /// Canonical correlations of the final IR-MAD iteration
    pub rhos: Vec<f64>,
}

/// Output of [`radcalbatch`]
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Reference (unnormalized) followed by the normalized targets in input order
    pub images: Vec<Image>,
    /// Per-target normalization details, in input order
    pub targets: Vec<RadcalResult>,
    /// Human-readable log
    pub log: Vec<String>,
}

/// No-change mask: `true` where `chi2_cdf(chi2, nbands) < significance`.
///
/// NaN cells are never invariant.
pub fn invariant_mask(chi2: &Raster<f64>, nbands: usize, significance: f64) -> Result<Mask> {
    if nbands == 0 {
        return Err(Error::invalid_parameter("nbands", nbands, "must be at least 1"));
    }
    let dof = nbands as f64;
    Ok(Mask::from_raster(chi2, |v| !v.is_nan() && chi2_cdf(v, dof) < significance))
}

/// Orthogonal regression of `target` onto `reference` over `mask`.
///
/// Returns the coefficients and the full normalized band
/// `slope * target + intercept`.
pub fn calibrate(
    reference: &Raster<f64>,
    target: &Raster<f64>,
    mask: &Mask,
    band: usize,
    min_pixels: usize,
) -> Result<(BandCalibration, Raster<f64>)> {
    reference.check_same_grid(target)?;
    if mask.shape() != target.shape() {
        return Err(Error::SizeMismatch {
            er: target.rows(),
            ec: target.cols(),
            ar: mask.shape().0,
            ac: mask.shape().1,
        });
    }

    let pairs: Vec<(f64, f64)> = target
        .data()
        .indexed_iter()
        .filter(|&((r, c), _)| mask.get(r, c))
        .map(|((r, c), &x)| (x, reference.data()[(r, c)]))
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect();

    let n = pairs.len();
    if n < min_pixels.max(2) {
        return Err(Error::InsufficientSamples {
            band,
            count: n,
            required: min_pixels.max(2),
        });
    }

    let nf = n as f64;
    let (sx, sy) = pairs.iter().fold((0.0, 0.0), |(a, b), (x, y)| (a + x, b + y));
    let (mx, my) = (sx / nf, sy / nf);
    let (mut s2x, mut s2y, mut sxy) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        let (dx, dy) = (x - mx, y - my);
        s2x += dx * dx;
        s2y += dy * dy;
        sxy += dx * dy;
    }
    s2x /= nf - 1.0;
    s2y /= nf - 1.0;
    sxy /= nf - 1.0;

    if sxy == 0.0 || !sxy.is_finite() {
        return Err(Error::SingularMatrix {
            what: format!("zero covariance between reference and target in band {}", band),
        });
    }

    let diff = s2y - s2x;
    let slope = (diff + (diff * diff + 4.0 * sxy * sxy).sqrt()) / (2.0 * sxy);
    let intercept = my - slope * mx;
    let correlation = sxy / (s2x * s2y).sqrt();

    let mut normalized = target.map(|v| slope * v + intercept);
    normalized.set_nodata(Some(f64::NAN));

    Ok((
        BandCalibration {
            band,
            slope,
            intercept,
            correlation,
            n_pixels: n,
        },
        normalized,
    ))
}

/// Calibrate every band of `target` against `reference` over `mask`
pub fn radcal(
    reference: &Image,
    target: &Image,
    mask: &Mask,
    min_pixels: usize,
) -> Result<(Vec<BandCalibration>, Image)> {
    reference.check_compatible(target)?;

    let mut coefficients = Vec::with_capacity(target.nbands());
    let mut bands = Vec::with_capacity(target.nbands());
    for (k, (r, t)) in reference.bands().iter().zip(target.bands()).enumerate() {
        let (coef, band) = calibrate(r, t, mask, k, min_pixels)?;
        coefficients.push(coef);
        bands.push(band);
    }

    let mut normalized = Image::from_named_bands(target.band_names().to_vec(), bands)?;
    if let Some(id) = target.id() {
        normalized = normalized.with_id(id);
    }
    Ok((coefficients, normalized))
}

/// IR-MAD, invariant mask and per-band calibration for one image pair
pub fn radcal_pair(reference: &Image, target: &Image, params: RadcalParams) -> Result<RadcalResult> {
    params.validate()?;
    reference.check_compatible(target)?;

    let (reference, target) = match &params.imad.region {
        Some(region) => (reference.clip(region)?, target.clip(region)?),
        None => (reference.clone(), target.clone()),
    };
    let imad = ImadParams { region: None, ..params.imad };

    let mad = run_mad(&reference, &target, imad)?;
    let mask = invariant_mask(&mad.chi2, reference.nbands(), params.significance)?;
    let invariant_pixels = mask.count();

    let (coefficients, normalized) = radcal(&reference, &target, &mask, params.min_invariant_pixels)?;

    Ok(RadcalResult {
        coefficients,
        normalized,
        mask,
        invariant_pixels,
        iterations: mad.iterations(),
        rhos: mad.rhos().to_vec(),
    })
}

/// Normalize every image of a series against `images[reference_index]`.
///
/// The output list starts with the reference (clipped but otherwise
/// untouched), followed by each other image normalized against it, in input
/// order.
pub fn radcalbatch(images: &[Image], reference_index: usize, params: RadcalParams) -> Result<BatchResult> {
    params.validate()?;
    if images.len() < 2 {
        return Err(Error::InsufficientData {
            what: "images for batch normalization",
            required: 2,
            actual: images.len(),
        });
    }
    let Some(reference) = images.get(reference_index) else {
        return Err(Error::invalid_parameter(
            "reference_index",
            reference_index,
            format!("must be below the number of images ({})", images.len()),
        ));
    };
    for image in images {
        reference.check_compatible(image)?;
    }

    let label = |i: usize| {
        images[i]
            .id()
            .map(str::to_string)
            .unwrap_or_else(|| format!("image {}", i))
    };

    let mut log = vec![
        format!(
            "RADCAL BATCH (significance {}, {} iterations)",
            params.significance, params.imad.iterations
        ),
        format!("REFERENCE: {}", label(reference_index)),
        "TARGETS:".to_string(),
    ];

    let passthrough = match &params.imad.region {
        Some(region) => reference.clip(region)?,
        None => reference.clone(),
    };
    let mut outputs = vec![passthrough];
    let mut targets = Vec::with_capacity(images.len() - 1);

    for (i, target) in images.iter().enumerate() {
        if i == reference_index {
            continue;
        }
        let result = radcal_pair(reference, target, params)?;
        info!(
            target = %label(i),
            invariant_pixels = result.invariant_pixels,
            "normalized against reference"
        );

        log.push(label(i));
        log.push(format!("  iterations: {}", result.iterations));
        log.push(format!("  invariant pixels: {}", result.invariant_pixels));
        for c in &result.coefficients {
            log.push(format!(
                "  band {}: slope {:.6}, intercept {:.6}, R {:.6}",
                c.band + 1,
                c.slope,
                c.intercept,
                c.correlation
            ));
        }

        outputs.push(result.normalized.clone());
        targets.push(result);
    }

    Ok(BatchResult {
        images: outputs,
        targets,
        log,
    })
}

/// Batch radiometric normalization against a fixed reference
#[derive(Debug, Clone, Default)]
pub struct RadcalBatch;

impl Algorithm for RadcalBatch {
    /// Image series and the index of the reference within it
    type Input = (Vec<Image>, usize);
    type Output = BatchResult;
    type Params = RadcalParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "RadcalBatch"
    }

    fn description(&self) -> &'static str {
        "Relative radiometric normalization of an image series on IR-MAD invariant pixels"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        radcalbatch(&input.0, input.1, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use changedet_core::GeoTransform;

    fn band(rows: usize, cols: usize, f: impl Fn(usize, usize) -> f64) -> Raster<f64> {
        let data = (0..rows * cols).map(|i| f(i / cols, i % cols)).collect();
        let mut r = Raster::from_vec(data, rows, cols).unwrap();
        r.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
        r
    }

    #[test]
    fn test_calibrate_recovers_linear_map() {
        let reference = band(10, 10, |r, c| ((r * 7 + c * 13) % 23) as f64 + 0.1 * r as f64);
        // target = (reference - 4) / 2.5, so reference = 2.5 * target + 4
        let target = reference.map(|v| (v - 4.0) / 2.5);
        let mask = Mask::filled_like(&target, true);

        let (coef, normalized) = calibrate(&reference, &target, &mask, 0, 30).unwrap();
        assert_relative_eq!(coef.slope, 2.5, epsilon = 1e-9);
        assert_relative_eq!(coef.intercept, 4.0, epsilon = 1e-9);
        assert_relative_eq!(coef.correlation, 1.0, epsilon = 1e-12);
        assert_eq!(coef.n_pixels, 100);
        assert_relative_eq!(normalized.get(3, 4).unwrap(), reference.get(3, 4).unwrap(), epsilon = 1e-9);
    }

    #[test]
    fn test_calibrate_uses_only_masked_pixels() {
        let reference = band(10, 10, |r, c| (r * 10 + c) as f64);
        // Bottom half has been altered
        let target = band(10, 10, |r, c| if r < 5 { 0.5 * (r * 10 + c) as f64 } else { 999.0 });
        let mask = Mask::from_raster(&target, |v| v < 999.0);

        let (coef, _) = calibrate(&reference, &target, &mask, 2, 30).unwrap();
        assert_relative_eq!(coef.slope, 2.0, epsilon = 1e-9);
        assert_relative_eq!(coef.intercept, 0.0, epsilon = 1e-9);
        assert_eq!(coef.band, 2);
        assert_eq!(coef.n_pixels, 50);
    }

    #[test]
    fn test_calibrate_insufficient_samples() {
        let reference = band(5, 5, |r, c| (r + c) as f64);
        let target = reference.clone();
        let mask = Mask::from_raster(&target, |v| v < 2.0);
        let err = calibrate(&reference, &target, &mask, 1, 30).unwrap_err();
        assert!(matches!(err, Error::InsufficientSamples { band: 1, count: 3, required: 30 }));
        assert_eq!(err.kind(), changedet_core::ErrorKind::Numerical);
    }

    #[test]
    fn test_calibrate_constant_target_is_numerical_error() {
        let reference = band(6, 6, |r, c| (r * 6 + c) as f64);
        let target = band(6, 6, |_, _| 1.0);
        let mask = Mask::filled_like(&target, true);
        let err = calibrate(&reference, &target, &mask, 0, 10).unwrap_err();
        assert!(matches!(err, Error::SingularMatrix { .. }));
    }

    #[test]
    fn test_invariant_mask_threshold() {
        // 3 bands: cdf(0.35) ≈ 0.05
        let chi2 = Raster::from_vec(vec![0.1, 0.3, 0.4, 20.0, f64::NAN, 0.0], 2, 3).unwrap();
        let mask = invariant_mask(&chi2, 3, 0.05).unwrap();
        assert!(mask.get(0, 0));
        assert!(mask.get(0, 1));
        assert!(!mask.get(0, 2));
        assert!(!mask.get(1, 0));
        assert!(!mask.get(1, 1));
        assert!(mask.get(1, 2));
        assert_eq!(mask.count(), 3);
    }

    fn bits(raster: &Raster<f64>) -> Vec<u64> {
        raster.data().iter().map(|v| v.to_bits()).collect()
    }

    #[test]
    fn test_reruns_are_bit_identical() {
        let noise = |r: usize, c: usize, k: usize| ((r * 31 + c * 17 + k * 7) % 11) as f64 * 0.05 - 0.25;
        let reference = Image::from_bands(vec![
            band(30, 30, |r, c| ((r * 7 + c * 13) % 23) as f64 + 0.1 * r as f64),
            band(30, 30, |r, c| ((r * 5 + c * 3) % 19) as f64 + 0.1 * c as f64),
        ])
        .unwrap()
        .with_id("ref");
        let target = Image::from_bands(
            reference
                .bands()
                .iter()
                .enumerate()
                .map(|(k, b)| {
                    band(30, 30, |r, c| {
                        let v = b.get(r, c).unwrap();
                        if r < 5 && c < 5 { 40.0 - v } else { 1.3 * v + 2.0 + noise(r, c, k) }
                    })
                })
                .collect(),
        )
        .unwrap()
        .with_id("target");
        let params = RadcalParams {
            min_invariant_pixels: 5,
            imad: ImadParams { iterations: 5, ..Default::default() },
            ..Default::default()
        };

        let first = radcal_pair(&reference, &target, params).unwrap();
        let second = radcal_pair(&reference, &target, params).unwrap();
        assert_eq!(first.coefficients, second.coefficients);
        assert_eq!(first.invariant_pixels, second.invariant_pixels);
        for k in 0..2 {
            assert_eq!(
                bits(first.normalized.band(k).unwrap()),
                bits(second.normalized.band(k).unwrap())
            );
        }

        let series = [reference, target];
        let a = radcalbatch(&series, 0, params).unwrap();
        let b = radcalbatch(&series, 0, params).unwrap();
        assert_eq!(a.log, b.log);
        for (x, y) in a.images.iter().zip(&b.images) {
            for k in 0..2 {
                assert_eq!(bits(x.band(k).unwrap()), bits(y.band(k).unwrap()));
            }
        }
    }

    #[test]
    fn test_batch_rejects_bad_reference() {
        let img = Image::from_bands(vec![band(4, 4, |r, c| (r + c) as f64)]).unwrap();
        let err = radcalbatch(&[img.clone(), img.clone()], 5, RadcalParams::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { name: "reference_index", .. }));

        let err = radcalbatch(&[img], 0, RadcalParams::default()).unwrap_err();
        assert_eq!(err.kind(), changedet_core::ErrorKind::InsufficientData);
    }

    #[test]
    fn test_invalid_significance() {
        let img = Image::from_bands(vec![band(4, 4, |r, c| (r + c) as f64)]).unwrap();
        let params = RadcalParams { significance: 1.5, ..Default::default() };
        assert!(matches!(
            radcal_pair(&img, &img, params),
            Err(Error::InvalidParameter { name: "significance", .. })
        ));
    }
}
