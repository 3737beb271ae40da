//! Region reducers
//!
//! Scalar summaries of a band over its valid (finite) cells, optionally
//! restricted by a mask or a region of interest.

use changedet_core::raster::{Image, Mask, Raster};
use changedet_core::region::Region;
use changedet_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Reduction applied to the selected cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reducer {
    Sum,
    Mean,
    Min,
    Max,
    Count,
}

/// Reduce the finite cells of `raster` (restricted to `mask` when given).
///
/// `Sum` and `Count` of an empty selection are 0; the other reducers
/// report [`Error::InsufficientData`].
pub fn reduce(raster: &Raster<f64>, reducer: Reducer, mask: Option<&Mask>) -> Result<f64> {
    if let Some(m) = mask
        && m.shape() != raster.shape()
    {
        return Err(Error::SizeMismatch {
            er: raster.rows(),
            ec: raster.cols(),
            ar: m.shape().0,
            ac: m.shape().1,
        });
    }

    let values = raster
        .data()
        .indexed_iter()
        .filter(|&((r, c), v)| v.is_finite() && mask.is_none_or(|m| m.get(r, c)))
        .map(|(_, &v)| v);

    let (count, sum, min, max) = values.fold(
        (0usize, 0.0, f64::INFINITY, f64::NEG_INFINITY),
        |(n, s, lo, hi), v| (n + 1, s + v, lo.min(v), hi.max(v)),
    );

    match reducer {
        Reducer::Sum => Ok(sum),
        Reducer::Count => Ok(count as f64),
        _ if count == 0 => Err(Error::InsufficientData {
            what: "valid cells in region",
            required: 1,
            actual: 0,
        }),
        Reducer::Mean => Ok(sum / count as f64),
        Reducer::Min => Ok(min),
        Reducer::Max => Ok(max),
    }
}

/// Reduce every band of `image` over `region` (whole image when `None`)
pub fn reduce_region(image: &Image, reducer: Reducer, region: Option<&Region>) -> Result<Vec<f64>> {
    let clipped;
    let image = match region {
        Some(region) => {
            clipped = image.clip(region)?;
            &clipped
        }
        None => image,
    };
    image
        .bands()
        .iter()
        .map(|band| reduce(band, reducer, None))
        .collect()
}
