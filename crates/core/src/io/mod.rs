//! GeoTIFF reading and writing
//!
//! The engines themselves are I/O-free; these helpers move single-band
//! GeoTIFFs in and out of [`Raster`](crate::Raster) and [`Image`](crate::Image).

mod native;

pub use native::{
    read_geotiff, read_geotiff_from_buffer, read_image, write_geotiff, write_geotiff_to_buffer,
    write_image,
};
