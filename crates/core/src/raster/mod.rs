//! Raster data structures

mod element;
mod geotransform;
mod grid;
mod image;
mod mask;
mod neighborhood;

pub use element::RasterElement;
pub use geotransform::GeoTransform;
pub use grid::{Raster, RasterStatistics};
pub use image::Image;
pub use mask::Mask;
pub use neighborhood::Neighborhood;
