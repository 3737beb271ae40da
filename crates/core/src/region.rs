//! Regions of interest

use crate::raster::GeoTransform;
use geo_types::{coord, Rect};
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangular region of interest in map coordinates.
///
/// Region reducers and clipping only consider pixels whose centers fall
/// inside the rectangle (edges inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    rect: Rect<f64>,
}

impl Region {
    /// Region from its corner coordinates; corners may be given in any order
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            rect: Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y }),
        }
    }

    /// Underlying rectangle
    pub fn rect(&self) -> Rect<f64> {
        self.rect
    }

    /// (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let (min, max) = (self.rect.min(), self.rect.max());
        (min.x, min.y, max.x, max.y)
    }

    /// Whether a map position lies inside the region
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let (min_x, min_y, max_x, max_y) = self.bounds();
        (min_x..=max_x).contains(&x) && (min_y..=max_y).contains(&y)
    }

    /// Pixel window `(row, col, rows, cols)` of a `rows x cols` grid covered
    /// by this region, or `None` when no pixel center falls inside.
    pub fn pixel_window(
        &self,
        transform: &GeoTransform,
        rows: usize,
        cols: usize,
    ) -> Option<(usize, usize, usize, usize)> {
        let (min_x, min_y, max_x, max_y) = self.bounds();
        let corners = [
            transform.geo_to_pixel(min_x, min_y),
            transform.geo_to_pixel(min_x, max_y),
            transform.geo_to_pixel(max_x, min_y),
            transform.geo_to_pixel(max_x, max_y),
        ];
        if corners.iter().any(|(c, r)| !c.is_finite() || !r.is_finite()) {
            return None;
        }

        let span = |lo: f64, hi: f64, n: usize| -> Option<(usize, usize)> {
            let first = (lo - 0.5).ceil().max(0.0);
            let last = (hi - 0.5).floor().min(n as f64 - 1.0);
            (first <= last).then(|| (first as usize, (last - first) as usize + 1))
        };

        let col_lo = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
        let col_hi = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max);
        let row_lo = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
        let row_hi = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);

        let (c0, nc) = span(col_lo, col_hi, cols)?;
        let (r0, nr) = span(row_lo, row_hi, rows)?;
        Some((r0, c0, nr, nc))
    }
}
