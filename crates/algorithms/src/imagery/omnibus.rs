//! Sequential omnibus change detection for multilook SAR series
//!
//! Each pixel of a `k`-image series is a sample covariance matrix that is
//! (complex) Wishart distributed with `n` equivalent looks. The omnibus
//! likelihood-ratio test of Conradsen et al. (2016) factors the hypothesis
//! "all `k` matrices are equal" into a chain of tests `R_j`, each asking
//! whether image `j` matches the common value of the images before it:
//!
//! ```text
//! ln R_j = n { p_e [j ln j - (j-1) ln(j-1)]
//!              + (j-1) ln|X_1 + … + X_{j-1}| + ln|X_j| - j ln|X_1 + … + X_j| }
//! ```
//!
//! `-2 ρ_j ln R_j` is approximately chi-square distributed; its CDF with
//! the second-order correction is
//!
//! ```text
//! P = (1 - ω₂) F_f(z) + ω₂ F_{f+4}(z)
//! ```
//!
//! A change at time `t` is declared where `P > 1 - α`. The test is then
//! restarted from image `t` to look for later changes.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::maybe_rayon::*;
use crate::statistics::{chi2_cdf, focal_median};
use changedet_core::raster::{Image, Raster};
use changedet_core::{Algorithm, Error, Result};

/// How the bands of each image encode the per-pixel covariance matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CovarianceLayout {
    /// Each band is an independent intensity channel (diagonal matrix),
    /// e.g. VV and VH backscatter
    #[default]
    Diagonal,
    /// Full dual-polarimetric 2x2 matrix in bands
    /// `C11, C22, Re(C12), Im(C12)`
    DualPolFull,
}

/// Parameters for the omnibus test
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OmnibusParams {
    /// Significance level α of every individual test
    pub significance: f64,
    /// Apply a 3x3 median filter to the change probabilities
    pub use_median: bool,
    /// Equivalent number of looks
    pub enl: f64,
    /// Band layout of the covariance matrices
    pub layout: CovarianceLayout,
}

impl Default for OmnibusParams {
    fn default() -> Self {
        Self {
            significance: 0.01,
            use_median: false,
            enl: 4.9,
            layout: CovarianceLayout::Diagonal,
        }
    }
}

impl OmnibusParams {
    fn validate(&self) -> Result<()> {
        if !(self.significance > 0.0 && self.significance < 1.0) {
            return Err(Error::invalid_parameter(
                "significance",
                self.significance,
                "must lie strictly between 0 and 1",
            ));
        }
        if !(self.enl > 0.0 && self.enl.is_finite()) {
            return Err(Error::invalid_parameter("enl", self.enl, "must be positive"));
        }
        Ok(())
    }
}

/// Change maps of a series of `k` images.
///
/// Times are 1-based image positions; 0 means no change.
#[derive(Debug, Clone)]
pub struct ChangeMaps {
    /// Time of the most recent change
    pub cmap: Raster<u16>,
    /// Time of the first change
    pub smap: Raster<u16>,
    /// Number of changes
    pub fmap: Raster<u16>,
    /// One band per interval: band `t - 2` is 1 where a change occurred
    /// between images `t - 1` and `t`
    pub bmap: Vec<Raster<u8>>,
}

/// Omnibus change detection algorithm
#[derive(Debug, Clone, Default)]
pub struct Omnibus;

impl Algorithm for Omnibus {
    type Input = Vec<Image>;
    type Output = ChangeMaps;
    type Params = OmnibusParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Omnibus"
    }

    fn description(&self) -> &'static str {
        "Sequential omnibus Wishart change detection over an image series"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        omnibus(&input, params)
    }
}

/// Matrix constants of the test for a given layout
struct TestShape {
    /// Multiplier of the `j ln j` term (matrix order for full matrices)
    p_e: f64,
    /// Degrees of freedom
    f: f64,
}

fn test_shape(layout: CovarianceLayout, nbands: usize) -> TestShape {
    match layout {
        CovarianceLayout::Diagonal => TestShape {
            p_e: nbands as f64,
            f: nbands as f64,
        },
        CovarianceLayout::DualPolFull => TestShape { p_e: 2.0, f: 4.0 },
    }
}

/// Change probability for the statistic `z = -2 ln R_j` of window length
/// `j ≥ 2`: the CDF of `ρ_j z` with the second-order `ω₂` correction.
pub fn omnibus_cdf(z: f64, j: usize, enl: f64, layout: CovarianceLayout, nbands: usize) -> f64 {
    let TestShape { f, .. } = test_shape(layout, nbands);
    let jf = j as f64;
    let window = 1.0 + 1.0 / (jf * (jf - 1.0));

    let (rho, omega2) = match layout {
        CovarianceLayout::Diagonal => {
            let rho = 1.0 - window / (6.0 * enl);
            (rho, -(f / 4.0) * (1.0 - 1.0 / rho).powi(2))
        }
        CovarianceLayout::DualPolFull => {
            let p = 2.0;
            let rho = 1.0 - (2.0 * p * p - 1.0) / (6.0 * p * enl) * window;
            (rho, -(p * p / 4.0) * (1.0 - 1.0 / rho).powi(2))
        }
    };

    let z = rho * z;
    let prob = (1.0 - omega2) * chi2_cdf(z, f) + omega2 * chi2_cdf(z, f + 4.0);
    prob.clamp(0.0, 1.0)
}

/// `-2 ln R_j` from the log-determinants of the running sums
fn lnr_statistic(j: usize, enl: f64, p_e: f64, ln_prev: f64, ln_x: f64, ln_sum: f64) -> f64 {
    let jf = j as f64;
    let jlnj = jf * jf.ln() - if j > 2 { (jf - 1.0) * (jf - 1.0).ln() } else { 0.0 };
    let lnr = enl * (p_e * jlnj + (jf - 1.0) * ln_prev + ln_x - jf * ln_sum);
    -2.0 * lnr
}

/// ln of the determinant of the covariance matrix encoded by `c`
fn ln_det(layout: CovarianceLayout, c: &[f64]) -> f64 {
    let det_ln = match layout {
        CovarianceLayout::Diagonal => c
            .iter()
            .map(|&v| if v > 0.0 { v.ln() } else { f64::NAN })
            .sum::<f64>(),
        CovarianceLayout::DualPolFull => {
            let det = c[0] * c[1] - c[2] * c[2] - c[3] * c[3];
            if det > 0.0 { det.ln() } else { f64::NAN }
        }
    };
    if det_ln.is_finite() { det_ln } else { f64::NAN }
}

fn check_series(images: &[Image], layout: CovarianceLayout) -> Result<()> {
    if images.len() < 2 {
        return Err(Error::InsufficientData {
            what: "images in series",
            required: 2,
            actual: images.len(),
        });
    }
    for image in &images[1..] {
        images[0].check_compatible(image)?;
    }
    if layout == CovarianceLayout::DualPolFull && images[0].nbands() != 4 {
        return Err(Error::BandCountMismatch {
            expected: 4,
            actual: images[0].nbands(),
        });
    }
    Ok(())
}

/// Change probabilities `P(R_j)` for window lengths `j = 2..=images.len()`.
///
/// Element `j - 2` is the probability image that image `j` differs from the
/// images before it, assuming those are all equal. Pixels with a
/// non-positive determinant are NaN.
pub fn change_probabilities(images: &[Image], params: OmnibusParams) -> Result<Vec<Raster<f64>>> {
    params.validate()?;
    check_series(images, params.layout)?;

    let k = images.len();
    let nb = images[0].nbands();
    let (rows, cols) = images[0].shape();
    let TestShape { p_e, .. } = test_shape(params.layout, nb);
    let layout = params.layout;
    let enl = params.enl;

    // Row-major blocks of (k - 1) probabilities per pixel
    let row_results: Vec<Vec<f64>> = (0..rows)
        .into_par_iter()
        .map(|row| {
            let mut out = vec![f64::NAN; (k - 1) * cols];
            let mut sum = vec![0.0; nb];
            let mut x = vec![0.0; nb];

            for col in 0..cols {
                if !images[0].pixel_into(row, col, &mut sum) {
                    continue;
                }
                let mut ln_prev = ln_det(layout, &sum);
                for j in 2..=k {
                    if !images[j - 1].pixel_into(row, col, &mut x) {
                        break;
                    }
                    for (s, v) in sum.iter_mut().zip(&x) {
                        *s += v;
                    }
                    let ln_x = ln_det(layout, &x);
                    let ln_sum = ln_det(layout, &sum);
                    let z = lnr_statistic(j, enl, p_e, ln_prev, ln_x, ln_sum);
                    if z.is_nan() {
                        break;
                    }
                    out[(j - 2) * cols + col] = omnibus_cdf(z, j, enl, layout, nb);
                    ln_prev = ln_sum;
                }
            }
            out
        })
        .collect();

    let like = images[0].band(0)?;
    (0..k - 1)
        .map(|w| {
            let mut data = Vec::with_capacity(rows * cols);
            for block in &row_results {
                data.extend_from_slice(&block[w * cols..(w + 1) * cols]);
            }
            let mut prob = like.with_vec(data)?;
            prob.set_nodata(Some(f64::NAN));
            Ok(prob)
        })
        .collect()
}

/// Sequential omnibus change detection.
///
/// For every restart time `ell = 1..k-1`, pixels whose last change is at
/// `ell` (or that have never changed, for `ell = 1`) are tested against
/// the windows starting at image `ell`; the first rejected window of length
/// `j` marks a change at time `t = ell + j - 1`.
pub fn omnibus(images: &[Image], params: OmnibusParams) -> Result<ChangeMaps> {
    params.validate()?;
    check_series(images, params.layout)?;

    let k = images.len();
    let (rows, cols) = images[0].shape();
    let threshold = 1.0 - params.significance;

    let mut cmap = Array2::<u16>::zeros((rows, cols));
    let mut smap = Array2::<u16>::zeros((rows, cols));
    let mut fmap = Array2::<u16>::zeros((rows, cols));
    let mut bmap = vec![Array2::<u8>::zeros((rows, cols)); k - 1];

    for ell in 1..k {
        let is_active = |last: u16| (ell == 1 && last == 0) || usize::from(last) == ell;
        let active = cmap.iter().filter(|&&c| is_active(c)).count();
        if active == 0 {
            debug!(ell, "omnibus: no pixel restarts here");
            continue;
        }

        let mut probs = change_probabilities(&images[ell - 1..], params)?;
        if params.use_median {
            probs = probs.iter().map(focal_median).collect::<Result<Vec<_>>>()?;
        }
        debug!(ell, active, windows = probs.len(), "omnibus restart window");

        for (w, prob) in probs.iter().enumerate() {
            let t = ell + w + 1;
            // Times are bounded by the series length, which fits u16 here
            let t16 = u16::try_from(t).map_err(|_| {
                Error::invalid_parameter("images", k, "series longer than 65535 images")
            })?;
            for ((r, c), &p) in prob.data().indexed_iter() {
                if p > threshold && is_active(cmap[(r, c)]) {
                    cmap[(r, c)] = t16;
                    if ell == 1 {
                        smap[(r, c)] = t16;
                    }
                    fmap[(r, c)] += 1;
                    bmap[t - 2][(r, c)] = 1;
                }
            }
        }
    }

    let like = images[0].band(0)?;
    Ok(ChangeMaps {
        cmap: like.with_data(cmap)?,
        smap: like.with_data(smap)?,
        fmap: like.with_data(fmap)?,
        bmap: bmap
            .into_iter()
            .map(|b| like.with_data(b))
            .collect::<Result<Vec<_>>>()?,
    })
}
