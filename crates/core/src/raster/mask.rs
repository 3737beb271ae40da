//! Boolean per-pixel masks

use crate::error::Result;
use crate::raster::{Raster, RasterElement};
use ndarray::Array2;

/// A boolean grid co-registered with the rasters it was derived from.
///
/// Used for invariant (no-change) pixels and for the valid-pixel domain of
/// region statistics.
#[derive(Debug, Clone)]
pub struct Mask {
    inner: Raster<u8>,
}

impl Mask {
    /// Mask on the grid of `like`, `true` where `f` holds for the cell value
    pub fn from_raster<T, F>(like: &Raster<T>, f: F) -> Self
    where
        T: RasterElement,
        F: Fn(T) -> bool,
    {
        Self {
            inner: like.map(|v| u8::from(f(v))),
        }
    }

    /// Mask on the grid of `like` with every cell set to `value`
    pub fn filled_like<T: RasterElement>(like: &Raster<T>, value: bool) -> Self {
        Self::from_raster(like, |_| value)
    }

    /// Mask on the grid of `like` built from a boolean array of the same shape
    pub fn from_array<T: RasterElement>(like: &Raster<T>, flags: Array2<bool>) -> Result<Self> {
        Ok(Self {
            inner: like.with_data(flags.mapv(u8::from))?,
        })
    }

    /// Whether the cell at (row, col) is set; out-of-range cells are unset
    pub fn get(&self, row: usize, col: usize) -> bool {
        self.inner.get(row, col).is_ok_and(|v| v != 0)
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.inner.shape()
    }

    /// Number of set cells
    pub fn count(&self) -> usize {
        self.inner.data().iter().filter(|&&v| v != 0).count()
    }

    /// Mask as a 0/1 raster (for export)
    pub fn to_raster(&self) -> Raster<u8> {
        self.inner.clone()
    }
}
