//! Focal (moving window) filters
//!
//! Used to smooth per-pixel probability images before thresholding. NaN
//! cells are skipped inside the window; a window without any valid cell
//! yields NaN.

use ndarray::Array2;
use crate::maybe_rayon::*;
use changedet_core::raster::{Neighborhood, Raster};
use changedet_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Statistic evaluated over each window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FocalStatistic {
    /// Arithmetic mean
    Mean,
    /// Median (mean of the two middle values for even counts)
    Median,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
}

/// Parameters for focal filtering
#[derive(Debug, Clone, Copy)]
pub struct FocalParams {
    /// Window shape
    pub neighborhood: Neighborhood,
    /// Statistic to compute
    pub statistic: FocalStatistic,
}

impl Default for FocalParams {
    fn default() -> Self {
        Self {
            neighborhood: Neighborhood::Queen3x3,
            statistic: FocalStatistic::Median,
        }
    }
}

/// Apply a focal statistic to every cell of `raster`.
///
/// Windows are truncated at the raster edges.
pub fn focal_statistics(raster: &Raster<f64>, params: FocalParams) -> Result<Raster<f64>> {
    let (rows, cols) = raster.shape();
    let offsets = params.neighborhood.offsets();

    let output_data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            let mut values: Vec<f64> = Vec::with_capacity(offsets.len());

            for (col, out) in row_data.iter_mut().enumerate() {
                values.clear();
                for &(dr, dc) in &offsets {
                    let nr = row as isize + dr;
                    let nc = col as isize + dc;
                    if nr >= 0 && nc >= 0 && (nr as usize) < rows && (nc as usize) < cols {
                        let v = unsafe { raster.get_unchecked(nr as usize, nc as usize) };
                        if !v.is_nan() {
                            values.push(v);
                        }
                    }
                }
                if !values.is_empty() {
                    *out = compute_statistic(&mut values, params.statistic);
                }
            }
            row_data
        })
        .collect();

    let mut output = raster.with_same_meta::<f64>(rows, cols);
    output.set_nodata(Some(f64::NAN));
    *output.data_mut() = Array2::from_shape_vec((rows, cols), output_data)
        .map_err(|e| Error::Other(e.to_string()))?;
    Ok(output)
}

/// 3x3 focal median
pub fn focal_median(raster: &Raster<f64>) -> Result<Raster<f64>> {
    focal_statistics(raster, FocalParams::default())
}

fn compute_statistic(values: &mut [f64], stat: FocalStatistic) -> f64 {
    match stat {
        FocalStatistic::Mean => values.iter().sum::<f64>() / values.len() as f64,
        FocalStatistic::Median => {
            values.sort_by(f64::total_cmp);
            let mid = values.len() / 2;
            if values.len() % 2 == 0 {
                (values[mid - 1] + values[mid]) / 2.0
            } else {
                values[mid]
            }
        }
        FocalStatistic::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        FocalStatistic::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use changedet_core::GeoTransform;

    fn gradient_raster(size: usize) -> Raster<f64> {
        let mut r = Raster::from_vec((0..size * size).map(|v| v as f64).collect(), size, size)
            .unwrap();
        r.set_transform(GeoTransform::new(0.0, size as f64, 1.0, -1.0));
        r
    }

    #[test]
    fn test_median_removes_isolated_spike() {
        let mut r = Raster::filled(5, 5, 0.1);
        r.set(2, 2, 0.99).unwrap();
        let out = focal_median(&r).unwrap();
        assert_eq!(out.get(2, 2).unwrap(), 0.1);
    }

    #[test]
    fn test_min_max_mean() {
        let r = gradient_raster(10);
        let stat = |statistic| {
            focal_statistics(&r, FocalParams { neighborhood: Neighborhood::Queen3x3, statistic })
                .unwrap()
                .get(5, 5)
                .unwrap()
        };
        // Cell (5,5) = 55, neighbors span (4,4)=44 to (6,6)=66
        assert_eq!(stat(FocalStatistic::Min), 44.0);
        assert_eq!(stat(FocalStatistic::Max), 66.0);
        assert!((stat(FocalStatistic::Mean) - 55.0).abs() < 1e-10);
    }

    #[test]
    fn test_edges_and_nan() {
        let mut r = gradient_raster(3);
        r.set(0, 1, f64::NAN).unwrap();
        let out = focal_statistics(&r, FocalParams {
            neighborhood: Neighborhood::Rook3x3,
            statistic: FocalStatistic::Max,
        })
        .unwrap();
        // Corner window: (0,0)=0, (1,0)=3, (0,1) skipped
        assert_eq!(out.get(0, 0).unwrap(), 3.0);

        let all_nan = Raster::filled(2, 2, f64::NAN);
        assert!(focal_median(&all_nan).unwrap().get(0, 0).unwrap().is_nan());
    }
}
