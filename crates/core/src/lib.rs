//! # changedet core
//!
//! Raster substrate for the change-detection engines.
//!
//! This crate provides:
//! - `Raster<T>`: georeferenced single-band grid
//! - `Image`: ordered, named bands sharing one grid (a multi-band acquisition)
//! - `Mask`: boolean per-pixel grid (e.g. invariant pixels)
//! - `Region`: rectangular region of interest used for clipping
//! - `GeoTransform` and `Crs` for georeferencing
//! - The error taxonomy shared by all engines
//! - Native GeoTIFF I/O

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;
pub mod region;

pub use crs::Crs;
pub use error::{Error, ErrorKind, Result};
pub use raster::{GeoTransform, Image, Mask, Raster, RasterElement};
pub use region::Region;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::Crs;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::raster::{GeoTransform, Image, Mask, Raster, RasterElement};
    pub use crate::region::Region;
    pub use crate::Algorithm;
}

/// Common shape of the change-detection engines.
///
/// Engines are pure functions: they borrow nothing mutable, keep no state
/// between calls and return freshly derived images.
pub trait Algorithm {
    /// Input images
    type Input;
    /// Derived images and scalar results
    type Output;
    /// Caller-supplied configuration
    type Params: Default;
    /// Error type for algorithm execution
    type Error: std::error::Error;

    /// Short algorithm name
    fn name(&self) -> &'static str;

    /// One-line description
    fn description(&self) -> &'static str;

    /// Run the algorithm
    fn execute(&self, input: Self::Input, params: Self::Params) -> std::result::Result<Self::Output, Self::Error>;

    /// Run with default parameters
    fn execute_default(&self, input: Self::Input) -> std::result::Result<Self::Output, Self::Error> {
        self.execute(input, Self::Params::default())
    }
}
