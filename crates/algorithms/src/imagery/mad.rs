//! Iteratively re-weighted Multivariate Alteration Detection (IR-MAD)
//!
//! Canonical correlation analysis between two co-registered `p`-band images
//! X1, X2 finds weight vectors `a_k`, `b_k` such that `U_k = a_kᵀX1` and
//! `V_k = b_kᵀX2` have unit variance and maximal correlation `ρ_k`. The MAD
//! variates are `M_k = U_k - V_k` with variance `2(1 - ρ_k)`, and
//!
//! ```text
//! chi2 = Σ_k M_k² / (2(1 - ρ_k))
//! ```
//!
//! is approximately chi-square with `p` degrees of freedom for unchanged
//! pixels. Each iteration recomputes the covariance with pixel weights equal
//! to the no-change probability of the previous iteration, so changed pixels
//! progressively drop out of the statistics (Nielsen 2007).

use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::linalg::{generalized_eigen, invert_spd};
use crate::maybe_rayon::*;
use crate::statistics::{chi2_survival, weighted_covariance};
use changedet_core::raster::{Image, Raster};
use changedet_core::region::Region;
use changedet_core::{Algorithm, Error, Result};

/// MAD variances at or below this value are treated as zero; their term is
/// dropped from the chi-square sum.
const VARIANCE_FLOOR: f64 = 1e-10;

/// Below this correlation `b_k` is solved independently of `a_k`.
const MIN_PAIRED_RHO: f64 = 1e-6;

/// Parameters for IR-MAD
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImadParams {
    /// Number of iterations to run (no early stop)
    pub iterations: usize,
    /// Optional region both images are clipped to before processing
    pub region: Option<Region>,
    /// Max |Δρ| below which the run is reported as converged (diagnostic)
    pub convergence_tolerance: f64,
}

impl Default for ImadParams {
    fn default() -> Self {
        Self {
            iterations: 50,
            region: None,
            convergence_tolerance: 1e-4,
        }
    }
}

impl ImadParams {
    fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::invalid_parameter("iterations", self.iterations, "must be at least 1"));
        }
        if !(self.convergence_tolerance >= 0.0) {
            return Err(Error::invalid_parameter(
                "convergence_tolerance",
                self.convergence_tolerance,
                "must be non-negative",
            ));
        }
        Ok(())
    }
}

/// State threaded through the IR-MAD iterations.
///
/// Each [`imad_step`] consumes a state and returns its successor.
#[derive(Debug, Clone)]
pub struct MadState {
    /// Bands of the first image followed by the bands of the second
    pub stack: Image,
    /// Bands per image
    pub nbands: usize,
    /// Chi-square image of the last iteration (zeros before the first)
    pub chi2: Raster<f64>,
    /// MAD variates of the last iteration (zeros before the first)
    pub mad: Image,
    /// Canonical correlations of every completed iteration
    pub all_rhos: Vec<Vec<f64>>,
}

impl MadState {
    /// Initial state for a pair of compatible images
    pub fn new(image1: &Image, image2: &Image) -> Result<Self> {
        image1.check_compatible(image2)?;
        let nbands = image1.nbands();
        let first = image1.band(0)?;
        let (rows, cols) = first.shape();

        let stack = image1.concat(image2)?.rename(
            (1..=2)
                .flat_map(|t| (1..=nbands).map(move |k| format!("T{}_B{}", t, k))),
        )?;
        let zeros = first.with_same_meta::<f64>(rows, cols);
        let mad = Image::from_named_bands(mad_names(nbands), vec![zeros.clone(); nbands])?;

        Ok(Self {
            stack,
            nbands,
            chi2: zeros,
            mad,
            all_rhos: Vec::new(),
        })
    }

    /// Number of completed iterations
    pub fn iteration(&self) -> usize {
        self.all_rhos.len()
    }
}

/// Output of [`run_mad`]
#[derive(Debug, Clone)]
pub struct MadResult {
    /// MAD variates of the final iteration (`MAD1..MADp`)
    pub mad: Image,
    /// Chi-square statistic of the final iteration
    pub chi2: Raster<f64>,
    /// Canonical correlations per iteration, each sorted descending
    pub all_rhos: Vec<Vec<f64>>,
    /// First iteration whose max |Δρ| fell below the tolerance
    pub converged_at: Option<usize>,
}

impl MadResult {
    /// Canonical correlations of the final iteration
    pub fn rhos(&self) -> &[f64] {
        self.all_rhos.last().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of iterations run
    pub fn iterations(&self) -> usize {
        self.all_rhos.len()
    }
}

/// IR-MAD algorithm
#[derive(Debug, Clone, Default)]
pub struct Imad;

impl Algorithm for Imad {
    type Input = (Image, Image);
    type Output = MadResult;
    type Params = ImadParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "IR-MAD"
    }

    fn description(&self) -> &'static str {
        "Iteratively re-weighted multivariate alteration detection between two images"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        run_mad(&input.0, &input.1, params)
    }
}

/// Run IR-MAD for exactly `params.iterations` iterations.
///
/// Both images must have the same bands, grid and CRS. Iteration 1 uses
/// uniform weights; later iterations weight each pixel by the chi-square
/// survival probability of the previous iteration's statistic.
pub fn run_mad(image1: &Image, image2: &Image, params: ImadParams) -> Result<MadResult> {
    params.validate()?;

    let mut state = match &params.region {
        Some(region) => MadState::new(&image1.clip(region)?, &image2.clip(region)?)?,
        None => MadState::new(image1, image2)?,
    };

    let mut converged_at = None;
    for i in 1..=params.iterations {
        state = imad_step(state)?;

        let n = state.all_rhos.len();
        if n >= 2 && converged_at.is_none() {
            let delta = state.all_rhos[n - 1]
                .iter()
                .zip(&state.all_rhos[n - 2])
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            if delta < params.convergence_tolerance {
                converged_at = Some(i);
                if i < params.iterations {
                    warn!(
                        iteration = i,
                        budget = params.iterations,
                        delta,
                        "IR-MAD converged before the iteration budget was spent"
                    );
                }
            }
        }
    }

    let MadState { mad, chi2, all_rhos, .. } = state;
    Ok(MadResult {
        mad,
        chi2,
        all_rhos,
        converged_at,
    })
}

/// One IR-MAD iteration: weighted CCA, MAD variates and chi-square.
pub fn imad_step(state: MadState) -> Result<MadState> {
    let p = state.nbands;
    let weights = if state.all_rhos.is_empty() {
        None
    } else {
        Some(chi2_survival(&state.chi2, p)?)
    };

    let cov = weighted_covariance(&state.stack, weights.as_ref(), None)?;
    let sigma = &cov.covariance;
    let s11 = sigma.slice(s![..p, ..p]).to_owned();
    let s12 = sigma.slice(s![..p, p..]).to_owned();
    let s21 = sigma.slice(s![p.., ..p]).to_owned();
    let s22 = sigma.slice(s![p.., p..]).to_owned();

    let (rho, a, b) = canonical_correlation(&s11, &s12, &s21, &s22)?;
    debug!(iteration = state.iteration() + 1, rhos = ?rho, "IR-MAD canonical correlations");

    let (mad, chi2) = mad_variates(&state.stack, p, &cov.means, &a, &b, &rho)?;

    let mut all_rhos = state.all_rhos;
    all_rhos.push(rho);
    Ok(MadState {
        stack: state.stack,
        nbands: p,
        chi2,
        mad,
        all_rhos,
    })
}

/// Canonical correlations (descending) and weight matrices A, B (columns).
fn canonical_correlation(
    s11: &Array2<f64>,
    s12: &Array2<f64>,
    s21: &Array2<f64>,
    s22: &Array2<f64>,
) -> Result<(Vec<f64>, Array2<f64>, Array2<f64>)> {
    let singular = |image: usize| {
        move |e: Error| match e {
            Error::SingularMatrix { what } => Error::SingularMatrix {
                what: format!("auto-covariance of image {}: {}", image, what),
            },
            other => other,
        }
    };

    let s22_inv = invert_spd(s22).map_err(singular(2))?;
    let s11_inv = invert_spd(s11).map_err(singular(1))?;

    let c1 = s12.dot(&s22_inv).dot(s21);
    let (lambda, mut a) = generalized_eigen(&c1, s11).map_err(singular(1))?;
    let rho: Vec<f64> = lambda.iter().map(|l| l.clamp(0.0, 1.0).sqrt()).collect();

    // b_k = S22⁻¹ S21 a_k / ρ_k pairs each b_k with its a_k even when
    // correlations are tied; uncorrelated pairs fall back to their own solve.
    let mut b = s22_inv.dot(s21).dot(&a);
    let mut fallback: Option<Array2<f64>> = None;
    for (k, &r) in rho.iter().enumerate() {
        if r > MIN_PAIRED_RHO {
            b.column_mut(k).mapv_inplace(|v| v / r);
            continue;
        }
        if fallback.is_none() {
            let c2 = s21.dot(&s11_inv).dot(s12);
            fallback = Some(generalized_eigen(&c2, s22).map_err(singular(2))?.1);
        }
        if let Some(own) = &fallback {
            b.column_mut(k).assign(&own.column(k));
        }
    }

    // Sign of a_k: positive correlation with the first image's bands
    let s11a = s11.dot(&a);
    for k in 0..a.ncols() {
        let sum: f64 = (0..s11.nrows())
            .map(|i| s11a[(i, k)] / s11[(i, i)].sqrt())
            .sum();
        if sum < 0.0 {
            a.column_mut(k).mapv_inplace(|v| -v);
        }
    }
    // Sign of b_k: positive correlation between U_k and V_k
    let cross = a.t().dot(s12).dot(&b);
    for k in 0..b.ncols() {
        if cross[(k, k)] < 0.0 {
            b.column_mut(k).mapv_inplace(|v| -v);
        }
    }

    Ok((rho, a, b))
}

fn mad_variates(
    stack: &Image,
    p: usize,
    means: &[f64],
    a: &Array2<f64>,
    b: &Array2<f64>,
    rho: &[f64],
) -> Result<(Image, Raster<f64>)> {
    let (rows, cols) = stack.shape();
    let variances: Vec<f64> = rho.iter().map(|r| 2.0 * (1.0 - r)).collect();

    let row_results: Vec<(Vec<f64>, Vec<f64>)> = (0..rows)
        .into_par_iter()
        .map(|row| {
            let mut x = vec![0.0; 2 * p];
            let mut mad_row = vec![f64::NAN; p * cols];
            let mut chi2_row = vec![f64::NAN; cols];

            for col in 0..cols {
                if !stack.pixel_into(row, col, &mut x) {
                    continue;
                }
                for (v, m) in x.iter_mut().zip(means) {
                    *v -= m;
                }
                let mut chi2 = 0.0;
                for k in 0..p {
                    let mut u = 0.0;
                    let mut v = 0.0;
                    for i in 0..p {
                        u += a[(i, k)] * x[i];
                        v += b[(i, k)] * x[p + i];
                    }
                    let m = u - v;
                    mad_row[k * cols + col] = m;
                    if variances[k] > VARIANCE_FLOOR {
                        chi2 += m * m / variances[k];
                    }
                }
                chi2_row[col] = chi2;
            }
            (mad_row, chi2_row)
        })
        .collect();

    let like = stack.band(0)?;
    let mut chi2_data = Vec::with_capacity(rows * cols);
    let mut band_data = vec![Vec::with_capacity(rows * cols); p];
    for (mad_row, chi2_row) in &row_results {
        chi2_data.extend_from_slice(chi2_row);
        for (k, data) in band_data.iter_mut().enumerate() {
            data.extend_from_slice(&mad_row[k * cols..(k + 1) * cols]);
        }
    }

    let mut chi2 = like.with_vec(chi2_data)?;
    chi2.set_nodata(Some(f64::NAN));
    let bands = band_data
        .into_iter()
        .map(|data| {
            let mut band = like.with_vec(data)?;
            band.set_nodata(Some(f64::NAN));
            Ok(band)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((Image::from_named_bands(mad_names(p), bands)?, chi2))
}

fn mad_names(p: usize) -> Vec<String> {
    (1..=p).map(|k| format!("MAD{}", k)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use changedet_core::GeoTransform;

    /// Deterministic pseudo-texture in [0, 1)
    fn texture(seed: u64, rows: usize, cols: usize) -> Vec<f64> {
        let mut s = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (0..rows * cols)
            .map(|_| {
                s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (s >> 11) as f64 / (1u64 << 53) as f64
            })
            .collect()
    }

    fn make_image(seeds: &[u64], rows: usize, cols: usize) -> Image {
        let bands = seeds
            .iter()
            .map(|&seed| {
                let mut r = Raster::from_vec(texture(seed, rows, cols), rows, cols).unwrap();
                r.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
                r
            })
            .collect();
        Image::from_bands(bands).unwrap()
    }

    /// Second image: linear mix of the first plus independent noise
    fn related(image: &Image, noise_seed: u64, amount: f64) -> Image {
        let (rows, cols) = image.shape();
        let bands = image
            .bands()
            .iter()
            .enumerate()
            .map(|(k, band)| {
                let noise = Raster::from_vec(texture(noise_seed + k as u64, rows, cols), rows, cols)
                    .unwrap();
                let mut out = band
                    .zip_map(&noise, |x, n| 2.0 * x + 0.5 + amount * n)
                    .unwrap();
                out.set_transform(*band.transform());
                out
            })
            .collect();
        Image::from_bands(bands).unwrap()
    }

    #[test]
    fn test_identical_images_have_no_change() {
        let img = make_image(&[1, 2, 3], 20, 20);
        let result = run_mad(&img, &img, ImadParams { iterations: 3, ..Default::default() }).unwrap();

        assert_eq!(result.all_rhos.len(), 3);
        for rhos in &result.all_rhos {
            for &r in rhos {
                assert_relative_eq!(r, 1.0, epsilon = 1e-9);
            }
        }
        assert!(result.chi2.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_rhos_sorted_and_bounded() {
        let img1 = make_image(&[10, 11, 12, 13], 25, 25);
        let img2 = related(&img1, 100, 0.8);
        let result = run_mad(&img1, &img2, ImadParams { iterations: 5, ..Default::default() }).unwrap();

        for rhos in &result.all_rhos {
            assert_eq!(rhos.len(), 4);
            for w in rhos.windows(2) {
                assert!(w[0] >= w[1], "rhos must be non-increasing: {:?}", rhos);
            }
            assert!(rhos.iter().all(|r| (0.0..=1.0).contains(r)));
        }
        assert_eq!(result.mad.nbands(), 4);
        assert_eq!(result.mad.band_names()[0], "MAD1");
        assert!(result.chi2.data().iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_single_iteration_matches_unweighted_cca() {
        let img1 = make_image(&[21, 22], 15, 15);
        let img2 = related(&img1, 200, 0.5);
        let state = imad_step(MadState::new(&img1, &img2).unwrap()).unwrap();
        let result = run_mad(&img1, &img2, ImadParams { iterations: 1, ..Default::default() }).unwrap();
        assert_eq!(result.all_rhos, state.all_rhos);
        assert_eq!(result.converged_at, None);

        // MAD variance is 2(1 - ρ) under uniform weights
        let rho = &result.all_rhos[0];
        for (k, band) in result.mad.bands().iter().enumerate() {
            let n = band.len() as f64;
            let mean = band.data().sum() / n;
            let var = band.data().iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
            assert_relative_eq!(var, 2.0 * (1.0 - rho[k]), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_single_band_reduces_to_correlation() {
        let img1 = make_image(&[31], 12, 12);
        let img2 = related(&img1, 300, 1.0);
        let result = run_mad(&img1, &img2, ImadParams { iterations: 1, ..Default::default() }).unwrap();

        let x = img1.band(0).unwrap().data();
        let y = img2.band(0).unwrap().data();
        let n = x.len() as f64;
        let (mx, my) = (x.sum() / n, y.sum() / n);
        let sxy: f64 = x.iter().zip(y.iter()).map(|(a, b)| (a - mx) * (b - my)).sum();
        let sxx: f64 = x.iter().map(|a| (a - mx) * (a - mx)).sum();
        let syy: f64 = y.iter().map(|b| (b - my) * (b - my)).sum();
        assert_relative_eq!(result.rhos()[0], sxy / (sxx * syy).sqrt(), epsilon = 1e-10);
    }

    #[test]
    fn test_deterministic_reruns() {
        let img1 = make_image(&[41, 42, 43], 18, 18);
        let img2 = related(&img1, 400, 0.7);
        let params = ImadParams { iterations: 4, ..Default::default() };
        let a = run_mad(&img1, &img2, params).unwrap();
        let b = run_mad(&img1, &img2, params).unwrap();
        assert_eq!(a.all_rhos, b.all_rhos);
        assert!(a.chi2.data().iter().zip(b.chi2.data().iter()).all(|(x, y)| x.to_bits() == y.to_bits()));
    }

    #[test]
    fn test_mixed_bands_without_noise_give_zero_mad() {
        // Tied correlations (all 1): B must stay paired with A
        let img1 = make_image(&[71, 72], 20, 20);
        let (x1, x2) = (img1.band(0).unwrap(), img1.band(1).unwrap());
        let img2 = Image::from_bands(vec![
            x1.zip_map(x2, |a, b| a + b).unwrap(),
            x1.zip_map(x2, |a, b| a - 0.5 * b).unwrap(),
        ])
        .unwrap();
        let result = run_mad(&img1, &img2, ImadParams { iterations: 1, ..Default::default() }).unwrap();

        for &r in result.rhos() {
            assert_relative_eq!(r, 1.0, epsilon = 1e-9);
        }
        for band in result.mad.bands() {
            let max = band.data().iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            assert!(max < 1e-6, "max |MAD| = {}", max);
        }
        assert!(result.chi2.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_preconditions() {
        let img1 = make_image(&[1, 2], 8, 8);
        let img3 = make_image(&[1, 2, 3], 8, 8);
        assert!(matches!(
            run_mad(&img1, &img3, ImadParams::default()),
            Err(Error::BandCountMismatch { .. })
        ));
        let err = run_mad(&img1, &img1, ImadParams { iterations: 0, ..Default::default() }).unwrap_err();
        assert_eq!(err.kind(), changedet_core::ErrorKind::Precondition);
    }

    #[test]
    fn test_constant_band_is_singular() {
        let mut img1 = make_image(&[51, 52], 10, 10);
        img1 = Image::from_bands(vec![img1.band(0).unwrap().clone(), img1.band(0).unwrap().map(|_| 3.0)])
            .unwrap();
        let img2 = make_image(&[53, 54], 10, 10);
        let err = run_mad(&img1, &img2, ImadParams { iterations: 1, ..Default::default() }).unwrap_err();
        assert!(matches!(err, Error::SingularMatrix { .. }));
    }

    #[test]
    fn test_region_clips_inputs() {
        let img1 = make_image(&[61, 62], 20, 20);
        let img2 = related(&img1, 600, 0.6);
        let params = ImadParams {
            iterations: 2,
            region: Some(Region::new(0.0, 10.0, 10.0, 20.0)),
            ..Default::default()
        };
        let result = run_mad(&img1, &img2, params).unwrap();
        assert_eq!(result.chi2.shape(), (10, 10));
    }
}
