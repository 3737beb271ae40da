//! SAR backscatter helpers

use changedet_core::raster::Image;

/// Convert decibel backscatter to linear intensity, `10^(x / 10)`.
///
/// The omnibus test works on linear intensities; decibel products must be
/// converted first.
pub fn db_to_linear(image: &Image) -> Image {
    let k = std::f64::consts::LN_10 / 10.0;
    image.map_bands(|x| (x * k).exp())
}
