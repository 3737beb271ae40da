//! Multi-band images

use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster};
use crate::region::Region;

/// An acquisition: ordered, named `f64` bands on one shared pixel grid.
///
/// Images are immutable values; every operation returns a new image.
/// Non-finite cells are treated as no-data by all engines.
#[derive(Debug, Clone)]
pub struct Image {
    id: Option<String>,
    names: Vec<String>,
    bands: Vec<Raster<f64>>,
}

impl Image {
    /// Image from bands named `B1`, `B2`, ...
    pub fn from_bands(bands: Vec<Raster<f64>>) -> Result<Self> {
        let names = (1..=bands.len()).map(|i| format!("B{}", i)).collect();
        Self::from_named_bands(names, bands)
    }

    /// Image from explicitly named bands.
    ///
    /// All bands must share shape, transform and CRS.
    pub fn from_named_bands(names: Vec<String>, bands: Vec<Raster<f64>>) -> Result<Self> {
        let Some(first) = bands.first() else {
            return Err(Error::InsufficientData {
                what: "image",
                required: 1,
                actual: 0,
            });
        };
        if names.len() != bands.len() {
            return Err(Error::BandCountMismatch {
                expected: bands.len(),
                actual: names.len(),
            });
        }
        if first.is_empty() {
            return Err(Error::InvalidDimensions {
                width: first.cols(),
                height: first.rows(),
            });
        }
        for band in &bands[1..] {
            first.check_same_grid(band)?;
        }
        Ok(Self {
            id: None,
            names,
            bands,
        })
    }

    /// Attach an identifier (scene id, acquisition date, ...)
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Identifier, if any
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Number of bands
    pub fn nbands(&self) -> usize {
        self.bands.len()
    }

    /// All bands in order
    pub fn bands(&self) -> &[Raster<f64>] {
        &self.bands
    }

    /// Band names in order
    pub fn band_names(&self) -> &[String] {
        &self.names
    }

    /// Band at `index` (0-based)
    pub fn band(&self, index: usize) -> Result<&Raster<f64>> {
        self.bands
            .get(index)
            .ok_or_else(|| Error::UnknownBand(format!("#{} of {}", index, self.nbands())))
    }

    /// Band with the given name
    pub fn band_by_name(&self, name: &str) -> Result<&Raster<f64>> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.bands[i])
            .ok_or_else(|| Error::UnknownBand(name.to_string()))
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.bands[0].shape()
    }

    /// Shared geotransform
    pub fn transform(&self) -> &GeoTransform {
        self.bands[0].transform()
    }

    /// Shared CRS
    pub fn crs(&self) -> Option<&Crs> {
        self.bands[0].crs()
    }

    /// Values of all bands at (row, col) written into `out`.
    ///
    /// Returns `false` if any band is non-finite there. `out` must hold
    /// `nbands()` values and the position must be inside the grid.
    pub fn pixel_into(&self, row: usize, col: usize, out: &mut [f64]) -> bool {
        let mut valid = true;
        for (slot, band) in out.iter_mut().zip(&self.bands) {
            let v = band.data()[(row, col)];
            valid &= v.is_finite();
            *slot = v;
        }
        valid
    }

    /// New image with the bands at `indices`, in that order
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        let mut names = Vec::with_capacity(indices.len());
        let mut bands = Vec::with_capacity(indices.len());
        for &i in indices {
            bands.push(self.band(i)?.clone());
            names.push(self.names[i].clone());
        }
        Ok(Self {
            id: self.id.clone(),
            ..Self::from_named_bands(names, bands)?
        })
    }

    /// This image's bands followed by `other`'s
    pub fn concat(&self, other: &Image) -> Result<Self> {
        self.check_same_grid(other)?;
        let names = self.names.iter().chain(&other.names).cloned().collect();
        let bands = self.bands.iter().chain(&other.bands).cloned().collect();
        Ok(Self {
            id: self.id.clone(),
            names,
            bands,
        })
    }

    /// Same bands under new names
    pub fn rename<S: Into<String>>(&self, names: impl IntoIterator<Item = S>) -> Result<Self> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.len() != self.nbands() {
            return Err(Error::BandCountMismatch {
                expected: self.nbands(),
                actual: names.len(),
            });
        }
        Ok(Self {
            id: self.id.clone(),
            names,
            bands: self.bands.clone(),
        })
    }

    /// Apply `f` to every band, keeping names and id
    pub fn map_bands<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64,
    {
        Self {
            id: self.id.clone(),
            names: self.names.clone(),
            bands: self.bands.iter().map(|b| b.map(&f)).collect(),
        }
    }

    /// Crop to the pixels whose centers fall inside `region`
    pub fn clip(&self, region: &Region) -> Result<Self> {
        let (rows, cols) = self.shape();
        let (r0, c0, nr, nc) = region
            .pixel_window(self.transform(), rows, cols)
            .ok_or(Error::EmptyRegion)?;
        let bands = self
            .bands
            .iter()
            .map(|b| b.window(r0, c0, nr, nc))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id: self.id.clone(),
            names: self.names.clone(),
            bands,
        })
    }

    /// Error unless both images share shape, transform and CRS
    pub fn check_same_grid(&self, other: &Image) -> Result<()> {
        self.bands[0].check_same_grid(&other.bands[0])
    }

    /// Error unless both images have the same band count and grid
    pub fn check_compatible(&self, other: &Image) -> Result<()> {
        if self.nbands() != other.nbands() {
            return Err(Error::BandCountMismatch {
                expected: self.nbands(),
                actual: other.nbands(),
            });
        }
        self.check_same_grid(other)
    }
}
