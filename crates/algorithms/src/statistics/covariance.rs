//! Weighted band covariance

use ndarray::Array2;
use crate::maybe_rayon::*;
use changedet_core::raster::{Image, Mask, Raster};
use changedet_core::{Error, Result};

/// Weighted mean vector and covariance matrix of an image's bands
#[derive(Debug, Clone)]
pub struct WeightedCovariance {
    /// Weighted band means
    pub means: Vec<f64>,
    /// `Σ w (x - m)(x - m)ᵀ / Σ w`
    pub covariance: Array2<f64>,
    /// Number of pixels that entered the sums
    pub n_pixels: usize,
    /// Total weight
    pub sum_weights: f64,
}

/// Weighted covariance of all bands of `image`.
///
/// A pixel contributes when every band and its weight are finite, the
/// weight is non-negative and `mask` (if any) is set. Weights default to 1.
///
/// Row partial sums are reduced in row order, so the result does not
/// depend on the number of worker threads.
pub fn weighted_covariance(
    image: &Image,
    weights: Option<&Raster<f64>>,
    mask: Option<&Mask>,
) -> Result<WeightedCovariance> {
    let n = image.nbands();
    let (rows, cols) = image.shape();
    if let Some(w) = weights {
        image.band(0)?.check_same_shape(w)?;
    }
    if let Some(m) = mask
        && m.shape() != (rows, cols)
    {
        return Err(Error::SizeMismatch {
            er: rows,
            ec: cols,
            ar: m.shape().0,
            ac: m.shape().1,
        });
    }

    let pixel = |row: usize, col: usize, buf: &mut [f64]| -> Option<f64> {
        if mask.is_some_and(|m| !m.get(row, col)) {
            return None;
        }
        let w = match weights {
            Some(w) => unsafe { w.get_unchecked(row, col) },
            None => 1.0,
        };
        if !w.is_finite() || w < 0.0 {
            return None;
        }
        image.pixel_into(row, col, buf).then_some(w)
    };

    // Pass 1: weighted means
    let partials: Vec<(usize, f64, Vec<f64>)> = (0..rows)
        .into_par_iter()
        .map(|row| {
            let mut buf = vec![0.0; n];
            let mut sums = vec![0.0; n];
            let (mut count, mut sw) = (0usize, 0.0);
            for col in 0..cols {
                if let Some(w) = pixel(row, col, &mut buf) {
                    count += 1;
                    sw += w;
                    for (s, &x) in sums.iter_mut().zip(&buf) {
                        *s += w * x;
                    }
                }
            }
            (count, sw, sums)
        })
        .collect();

    let mut n_pixels = 0;
    let mut sum_weights = 0.0;
    let mut means = vec![0.0; n];
    for (count, sw, sums) in &partials {
        n_pixels += count;
        sum_weights += sw;
        for (m, s) in means.iter_mut().zip(sums) {
            *m += s;
        }
    }
    if n_pixels < 2 || sum_weights <= 0.0 {
        return Err(Error::InsufficientData {
            what: "weighted pixels for covariance",
            required: 2,
            actual: n_pixels,
        });
    }
    for m in &mut means {
        *m /= sum_weights;
    }

    // Pass 2: centred cross products (upper triangle)
    let partials: Vec<Vec<f64>> = (0..rows)
        .into_par_iter()
        .map(|row| {
            let mut buf = vec![0.0; n];
            let mut acc = vec![0.0; n * n];
            for col in 0..cols {
                if let Some(w) = pixel(row, col, &mut buf) {
                    for (x, m) in buf.iter_mut().zip(&means) {
                        *x -= m;
                    }
                    for i in 0..n {
                        let wi = w * buf[i];
                        for j in i..n {
                            acc[i * n + j] += wi * buf[j];
                        }
                    }
                }
            }
            acc
        })
        .collect();

    let mut covariance = Array2::<f64>::zeros((n, n));
    for acc in &partials {
        for i in 0..n {
            for j in i..n {
                covariance[(i, j)] += acc[i * n + j];
            }
        }
    }
    for i in 0..n {
        for j in i..n {
            let v = covariance[(i, j)] / sum_weights;
            covariance[(i, j)] = v;
            covariance[(j, i)] = v;
        }
    }

    Ok(WeightedCovariance {
        means,
        covariance,
        n_pixels,
        sum_weights,
    })
}
