//! Native GeoTIFF reading/writing on top of the `tiff` crate
//!
//! Supports single-band grayscale images with ModelPixelScale/ModelTiepoint
//! georeferencing and an EPSG code in the GeoKey directory. Multi-band images
//! are stored as one file per band.

use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Image, Raster, RasterElement};
use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

/// Read a single-band GeoTIFF file into a Raster
pub fn read_geotiff<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    decode_geotiff(file)
}

/// Read a single-band GeoTIFF from an in-memory buffer
pub fn read_geotiff_from_buffer<T: RasterElement>(data: &[u8]) -> Result<Raster<T>> {
    decode_geotiff(Cursor::new(data))
}

/// Read an image stored as one single-band GeoTIFF per band.
///
/// Bands are named after the file stems; all files must share one grid.
pub fn read_image<P: AsRef<Path>>(paths: &[P]) -> Result<Image> {
    let mut names = Vec::with_capacity(paths.len());
    let mut bands = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        names.push(
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("B{}", bands.len() + 1)),
        );
        bands.push(read_geotiff::<f64, _>(path)?);
    }
    Image::from_named_bands(names, bands)
}

fn decode_geotiff<T, R>(reader: R) -> Result<Raster<T>>
where
    T: RasterElement,
    R: Read + Seek,
{
    let mut decoder =
        Decoder::new(reader).map_err(|e| Error::Other(format!("TIFF decode error: {}", e)))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| Error::Other(format!("Cannot read dimensions: {}", e)))?;
    let (rows, cols) = (height as usize, width as usize);

    let result = decoder
        .read_image()
        .map_err(|e| Error::Other(format!("Cannot read image data: {}", e)))?;

    fn cast_all<S: Copy + num_traits::NumCast, T: RasterElement>(buf: Vec<S>) -> Vec<T> {
        buf.into_iter()
            .map(|v| num_traits::cast(v).unwrap_or_else(T::default_nodata))
            .collect()
    }

    let data: Vec<T> = match result {
        DecodingResult::F32(buf) => cast_all(buf),
        DecodingResult::F64(buf) => cast_all(buf),
        DecodingResult::U8(buf) => cast_all(buf),
        DecodingResult::U16(buf) => cast_all(buf),
        DecodingResult::U32(buf) => cast_all(buf),
        DecodingResult::I8(buf) => cast_all(buf),
        DecodingResult::I16(buf) => cast_all(buf),
        DecodingResult::I32(buf) => cast_all(buf),
        _ => {
            return Err(Error::UnsupportedDataType(
                "Unsupported TIFF pixel format".to_string(),
            ));
        }
    };

    if data.len() != rows * cols {
        return Err(Error::UnsupportedDataType(format!(
            "expected one sample per pixel ({} values), found {}",
            rows * cols,
            data.len()
        )));
    }

    let mut raster = Raster::from_vec(data, rows, cols)?;
    if let Some(transform) = read_geotransform(&mut decoder) {
        raster.set_transform(transform);
    }
    raster.set_crs(read_epsg(&mut decoder).map(Crs::from_epsg));
    Ok(raster)
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(Tag::Unknown(MODEL_PIXEL_SCALE)).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(Tag::Unknown(MODEL_TIEPOINT)).ok()?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }
    // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
    Some(GeoTransform::new(
        tiepoint[3] - tiepoint[0] * scale[0],
        tiepoint[4] + tiepoint[1] * scale[1],
        scale[0],
        -scale[1],
    ))
}

fn read_epsg<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<u32> {
    let keys = decoder.get_tag_u32_vec(Tag::Unknown(GEO_KEY_DIRECTORY)).ok()?;
    // Header of 4 values, then (key, location, count, value) entries
    keys.get(4..)?
        .chunks_exact(4)
        .find(|entry| {
            entry[1] == 0
                && (entry[0] == u32::from(PROJECTED_CS_TYPE_KEY)
                    || entry[0] == u32::from(GEOGRAPHIC_TYPE_KEY))
        })
        .map(|entry| entry[3])
}

/// Write a Raster to a GeoTIFF file as 32-bit float
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    encode_geotiff(raster, file)
}

/// Write a Raster to an in-memory GeoTIFF buffer
pub fn write_geotiff_to_buffer<T: RasterElement>(raster: &Raster<T>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_geotiff(raster, Cursor::new(&mut buf))?;
    Ok(buf)
}

/// Write every band of `image` to `<dir>/<prefix><band name>.tif`.
///
/// Returns the written paths in band order.
pub fn write_image<P: AsRef<Path>>(image: &Image, dir: P, prefix: &str) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    image
        .band_names()
        .iter()
        .zip(image.bands())
        .map(|(name, band)| {
            let path = dir.join(format!("{}{}.tif", prefix, name));
            write_geotiff(band, &path)?;
            Ok(path)
        })
        .collect()
}

fn encode_geotiff<T, W>(raster: &Raster<T>, writer: W) -> Result<()>
where
    T: RasterElement,
    W: Write + Seek,
{
    let mut encoder = TiffEncoder::new(writer)
        .map_err(|e| Error::Other(format!("TIFF encoder error: {}", e)))?;

    let (rows, cols) = raster.shape();
    let data: Vec<f32> = raster
        .data()
        .iter()
        .map(|&v| num_traits::cast(v).unwrap_or(f32::NAN))
        .collect();

    let mut image = encoder
        .new_image::<Gray32Float>(cols as u32, rows as u32)
        .map_err(|e| Error::Other(format!("Cannot create TIFF image: {}", e)))?;

    let gt = raster.transform();
    let scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
    image
        .encoder()
        .write_tag(Tag::Unknown(MODEL_PIXEL_SCALE), &scale[..])
        .map_err(|e| Error::Other(format!("Cannot write scale tag: {}", e)))?;

    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    image
        .encoder()
        .write_tag(Tag::Unknown(MODEL_TIEPOINT), &tiepoint[..])
        .map_err(|e| Error::Other(format!("Cannot write tiepoint tag: {}", e)))?;

    let geokeys = geokey_directory(raster.crs());
    image
        .encoder()
        .write_tag(Tag::Unknown(GEO_KEY_DIRECTORY), geokeys.as_slice())
        .map_err(|e| Error::Other(format!("Cannot write geokey tag: {}", e)))?;

    image
        .write_data(&data)
        .map_err(|e| Error::Other(format!("Cannot write image data: {}", e)))?;

    Ok(())
}

/// Minimal GeoKey directory: model type, raster type (PixelIsArea) and,
/// when known, the EPSG code of the CRS.
fn geokey_directory(crs: Option<&Crs>) -> Vec<u16> {
    let epsg = crs.and_then(Crs::epsg).and_then(|c| u16::try_from(c).ok());
    // EPSG codes 4000..5000 are geographic systems
    let geographic = epsg.is_some_and(|c| (4000..5000).contains(&c));
    let model_type = if geographic { 2 } else { 1 };

    let mut entries: Vec<[u16; 4]> = vec![
        [GT_MODEL_TYPE_KEY, 0, 1, model_type],
        [GT_RASTER_TYPE_KEY, 0, 1, 1],
    ];
    if let Some(code) = epsg {
        let key = if geographic { GEOGRAPHIC_TYPE_KEY } else { PROJECTED_CS_TYPE_KEY };
        entries.push([key, 0, 1, code]);
    }

    let mut keys = vec![1, 1, 0, entries.len() as u16];
    keys.extend(entries.iter().flatten());
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_roundtrip_keeps_georeferencing() {
        let mut r = Raster::from_vec((0..12).map(|v| v as f64 * 0.5).collect(), 3, 4).unwrap();
        r.set_transform(GeoTransform::new(500_000.0, 5_600_000.0, 10.0, -10.0));
        r.set_crs(Some(Crs::from_epsg(32632)));

        let buf = write_geotiff_to_buffer(&r).unwrap();
        let back: Raster<f64> = read_geotiff_from_buffer(&buf).unwrap();

        assert_eq!(back.shape(), (3, 4));
        assert_eq!(back.get(2, 3).unwrap(), 5.5);
        assert!(back.transform().same_grid(r.transform()));
        assert_eq!(back.crs(), Some(&Crs::Epsg(32632)));
    }

    #[test]
    fn test_write_and_read_image() {
        let dir = tempfile::tempdir().unwrap();
        let b1 = Raster::filled(2, 2, 1.0);
        let b2 = Raster::filled(2, 2, 2.0);
        let img = Image::from_named_bands(vec!["red".into(), "nir".into()], vec![b1, b2]).unwrap();

        let paths = write_image(&img, dir.path(), "scene_").unwrap();
        assert!(paths[1].ends_with("scene_nir.tif"));

        let back = read_image(&paths).unwrap();
        assert_eq!(back.band_names(), ["scene_red", "scene_nir"]);
        assert_eq!(back.band(1).unwrap().get(1, 1).unwrap(), 2.0);
    }
}
