//! Principal Component Analysis for multi-band images
//!
//! Builds the covariance matrix of the pixels that are valid in every band,
//! diagonalizes it with Jacobi rotations and projects the centred pixels onto
//! the eigenvectors. Offered next to MAD as an exploratory view of the
//! stacked bitemporal image.

use serde::{Deserialize, Serialize};

use crate::linalg::jacobi_eigen;
use crate::maybe_rayon::*;
use crate::statistics::weighted_covariance;
use changedet_core::raster::Image;
use changedet_core::{Error, Result};

/// Parameters for PCA
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PcaParams {
    /// Number of principal components to return (default: all)
    pub n_components: Option<usize>,
}

/// Result of PCA
#[derive(Debug, Clone)]
pub struct PcaResult {
    /// Principal component bands (`PC1`, `PC2`, ...)
    pub components: Image,
    /// Eigenvalues (variance of each returned component)
    pub eigenvalues: Vec<f64>,
    /// Proportion of total variance explained by each returned component
    pub variance_explained: Vec<f64>,
}

/// Principal components of `image`.
///
/// Eigenvectors are oriented so that their largest-magnitude coefficient is
/// positive. Pixels that are NaN in any band are NaN in every component.
pub fn pca(image: &Image, params: PcaParams) -> Result<PcaResult> {
    let n_bands = image.nbands();
    let n_components = params.n_components.unwrap_or(n_bands);
    if n_components == 0 || n_components > n_bands {
        return Err(Error::invalid_parameter(
            "n_components",
            n_components,
            format!("must be between 1 and the band count ({})", n_bands),
        ));
    }

    let cov = weighted_covariance(image, None, None)?;
    let (eigenvalues, mut vectors) = jacobi_eigen(&cov.covariance)?;

    for k in 0..n_bands {
        let mut column = vectors.column_mut(k);
        let dominant = column
            .iter()
            .copied()
            .fold(0.0_f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
        if dominant < 0.0 {
            column.mapv_inplace(|v| -v);
        }
    }

    let total_var: f64 = eigenvalues.iter().sum();
    let eigenvalues: Vec<f64> = eigenvalues.into_iter().take(n_components).collect();
    let variance_explained = eigenvalues
        .iter()
        .map(|ev| if total_var > 0.0 { ev / total_var } else { 0.0 })
        .collect();

    let (rows, cols) = image.shape();
    let means = &cov.means;
    let row_results: Vec<Vec<f64>> = (0..rows)
        .into_par_iter()
        .map(|row| {
            let mut pixel = vec![0.0; n_bands];
            let mut out = vec![f64::NAN; n_components * cols];
            for col in 0..cols {
                if !image.pixel_into(row, col, &mut pixel) {
                    continue;
                }
                for k in 0..n_components {
                    out[k * cols + col] = (0..n_bands)
                        .map(|b| (pixel[b] - means[b]) * vectors[(b, k)])
                        .sum();
                }
            }
            out
        })
        .collect();

    let like = image.band(0)?;
    let mut bands = Vec::with_capacity(n_components);
    for k in 0..n_components {
        let mut data = Vec::with_capacity(rows * cols);
        for block in &row_results {
            data.extend_from_slice(&block[k * cols..(k + 1) * cols]);
        }
        let mut band = like.with_vec(data)?;
        band.set_nodata(Some(f64::NAN));
        bands.push(band);
    }
    let names = (1..=n_components).map(|k| format!("PC{}", k)).collect();

    Ok(PcaResult {
        components: Image::from_named_bands(names, bands)?,
        eigenvalues,
        variance_explained,
    })
}
