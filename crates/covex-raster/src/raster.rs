//! GeoTIFF raster with lazily decoded chunks and nearest-pixel sampling.

use crate::crs::Crs;
use crate::{RasterError, Result};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use std::sync::Mutex;
use tiff::decoder::{ChunkType, Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::TiffError;
use tracing::trace;

// GeoTIFF and GDAL private tags.
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_MODEL_TRANSFORMATION: u16 = 34264;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

// GeoKey ids.
const KEY_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;

const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED: u16 = 32767;

/// Affine mapping from pixel space to raster CRS coordinates.
///
/// Same layout as GDAL: `x = c[0] + col * c[1] + row * c[2]` and
/// `y = c[3] + col * c[4] + row * c[5]`, where (col, row) are measured from
/// the top-left corner of the top-left pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// North-up transform from an origin (top-left corner) and pixel size.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self([origin_x, pixel_width, 0.0, origin_y, 0.0, -pixel_height.abs()])
    }

    /// Map fractional pixel coordinates to CRS coordinates.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let c = &self.0;
        (c[0] + col * c[1] + row * c[2], c[3] + col * c[4] + row * c[5])
    }

    /// Map CRS coordinates to fractional pixel coordinates.
    pub fn invert(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let c = &self.0;
        let det = c[1] * c[5] - c[2] * c[4];
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let dx = x - c[0];
        let dy = y - c[3];
        let col = (dx * c[5] - dy * c[2]) / det;
        let row = (dy * c[1] - dx * c[4]) / det;
        Some((col, row))
    }
}

/// Extent of a raster in its own CRS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// West edge.
    pub min_x: f64,
    /// South edge.
    pub min_y: f64,
    /// East edge.
    pub max_x: f64,
    /// North edge.
    pub max_y: f64,
}

impl Bounds {
    /// Check if a coordinate is within the bounds (edges inclusive).
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// `Read + Seek` source the decoder pulls chunks from.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// One decoded strip or tile, band-interleaved in row-major order.
struct Chunk {
    width: u32,
    data: Vec<f64>,
}

struct ChunkCache {
    decoder: Decoder<Box<dyn ReadSeek>>,
    chunks: HashMap<u32, Chunk>,
}

/// A single-image GeoTIFF opened for sampling.
///
/// Opening reads the header and the first IFD only. Strips or tiles are
/// decoded on first use and kept for the life of the raster, so sampling a
/// few points out of a large file touches a few chunks of it.
pub struct Raster {
    source_name: String,
    width: u32,
    height: u32,
    bands: u32,
    transform: GeoTransform,
    crs: Option<Crs>,
    no_data: Option<f64>,
    chunk_width: u32,
    chunk_height: u32,
    chunks_across: u32,
    cache: Mutex<ChunkCache>,
}

impl fmt::Debug for Raster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raster")
            .field("source_name", &self.source_name)
            .field("dimensions", &(self.width, self.height))
            .field("bands", &self.bands)
            .field("chunk", &(self.chunk_width, self.chunk_height))
            .field("crs", &self.crs)
            .finish()
    }
}

impl Raster {
    /// Open a GeoTIFF file on disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file), path.display().to_string())
    }

    /// Open an in-memory GeoTIFF.
    pub fn from_bytes(bytes: &[u8], source_name: impl Into<String>) -> Result<Self> {
        Self::from_reader(Cursor::new(bytes.to_vec()), source_name)
    }

    /// Open a GeoTIFF from any seekable reader, reading only its header.
    pub fn from_reader<R: Read + Seek + Send + 'static>(
        reader: R,
        source_name: impl Into<String>,
    ) -> Result<Self> {
        let source_name = source_name.into();
        let reader: Box<dyn ReadSeek> = Box::new(reader);
        let mut decoder = Decoder::new(reader).map_err(read_error)?;

        let (width, height) = decoder.dimensions().map_err(read_error)?;
        let bands = decoder
            .get_tag_u32(Tag::SamplesPerPixel)
            .unwrap_or(1)
            .max(1);

        let planar = decoder.get_tag_u32(Tag::PlanarConfiguration).unwrap_or(1);
        if planar == 2 && bands > 1 {
            return Err(RasterError::UnsupportedLayout {
                source_name,
                reason: "planar-separate bands are not supported".to_string(),
            });
        }

        let (chunk_width, chunk_height) = match decoder.get_chunk_type() {
            ChunkType::Strip => {
                let rows = decoder.get_tag_u32(Tag::RowsPerStrip).unwrap_or(height);
                (width, rows.clamp(1, height.max(1)))
            }
            ChunkType::Tile => {
                let tile_width = decoder.get_tag_u32(Tag::TileWidth);
                let tile_length = decoder.get_tag_u32(Tag::TileLength);
                match (tile_width, tile_length) {
                    (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
                    _ => {
                        return Err(RasterError::UnsupportedLayout {
                            source_name,
                            reason: "tiled image without tile dimensions".to_string(),
                        })
                    }
                }
            }
        };

        let geokeys = read_geokeys(&mut decoder);
        let transform = read_geotransform(&mut decoder, &geokeys, &source_name)?;
        let crs = crs_from_geokeys(&geokeys);
        let no_data = read_nodata_value(&mut decoder);

        Ok(Self {
            source_name,
            width,
            height,
            bands,
            transform,
            crs,
            no_data,
            chunk_width,
            chunk_height,
            chunks_across: width.div_ceil(chunk_width),
            cache: Mutex::new(ChunkCache {
                decoder,
                chunks: HashMap::new(),
            }),
        })
    }

    /// Replace the declared CRS, for rasters whose GeoKeys are missing or wrong.
    pub fn with_crs(mut self, crs: Crs) -> Self {
        self.crs = Some(crs);
        self
    }

    /// Sample the pixel containing `(x, y)` (raster CRS) for a 1-indexed band.
    ///
    /// Returns `Ok(None)` for coordinates outside the raster, for no-data
    /// pixels and for NaN pixels. Errors come from a bad band or from
    /// reading the chunk that holds the pixel.
    pub fn sample_nearest(&self, x: f64, y: f64, band: u32) -> Result<Option<f64>> {
        self.check_band(band)?;
        self.sample_unchecked(x, y, band)
    }

    /// Sample many points for one band, preserving order.
    pub fn sample_points(&self, points: &[(f64, f64)], band: u32) -> Result<Vec<Option<f64>>> {
        self.check_band(band)?;
        points
            .iter()
            .map(|&(x, y)| self.sample_unchecked(x, y, band))
            .collect()
    }

    fn check_band(&self, band: u32) -> Result<()> {
        if band == 0 || band > self.bands {
            return Err(RasterError::BandOutOfRange {
                band,
                bands: self.bands,
                source_name: self.source_name.clone(),
            });
        }
        Ok(())
    }

    fn sample_unchecked(&self, x: f64, y: f64, band: u32) -> Result<Option<f64>> {
        let Some((col, row)) = self.transform.invert(x, y) else {
            return Ok(None);
        };
        let (col, row) = (col.floor(), row.floor());
        if !(col >= 0.0 && row >= 0.0 && col < self.width as f64 && row < self.height as f64) {
            return Ok(None);
        }
        let (col, row) = (col as u32, row as u32);

        let (chunk_col, chunk_row) = (col / self.chunk_width, row / self.chunk_height);
        let index = chunk_row * self.chunks_across + chunk_col;
        let local_col = (col - chunk_col * self.chunk_width) as usize;
        let local_row = (row - chunk_row * self.chunk_height) as usize;

        let mut cache = self.cache.lock().map_err(|_| RasterError::UnsupportedLayout {
            source_name: self.source_name.clone(),
            reason: "chunk cache poisoned by an earlier panic".to_string(),
        })?;
        let chunk = self.load_chunk(&mut cache, index, chunk_col, chunk_row)?;

        let pixel = local_row * chunk.width as usize + local_col;
        let value = chunk.data[pixel * self.bands as usize + (band - 1) as usize];

        if value.is_nan() {
            return Ok(None);
        }
        if let Some(nodata) = self.no_data {
            if value == nodata {
                return Ok(None);
            }
        }
        Ok(Some(value))
    }

    /// Decode a chunk on first use.
    fn load_chunk<'c>(
        &self,
        cache: &'c mut ChunkCache,
        index: u32,
        chunk_col: u32,
        chunk_row: u32,
    ) -> Result<&'c Chunk> {
        let ChunkCache { decoder, chunks } = cache;
        if let Entry::Vacant(slot) = chunks.entry(index) {
            // Edge chunks come back cropped to the image
            let width = self.chunk_width.min(self.width - chunk_col * self.chunk_width);
            let height = self.chunk_height.min(self.height - chunk_row * self.chunk_height);

            trace!(raster = %self.source_name, chunk = index, "decoding chunk");
            let data = decode_samples(decoder.read_chunk(index).map_err(read_error)?);

            let expected = width as usize * height as usize * self.bands as usize;
            if data.len() != expected {
                return Err(RasterError::UnsupportedLayout {
                    source_name: self.source_name.clone(),
                    reason: format!(
                        "chunk {index} decoded {} samples, expected {width}x{height}x{} = {expected}",
                        data.len(),
                        self.bands
                    ),
                });
            }
            slot.insert(Chunk { width, data });
        }
        chunks.get(&index).ok_or_else(|| RasterError::UnsupportedLayout {
            source_name: self.source_name.clone(),
            reason: format!("chunk {index} missing from cache"),
        })
    }

    /// Size of one strip or tile as (width, height).
    pub fn chunk_dimensions(&self) -> (u32, u32) {
        (self.chunk_width, self.chunk_height)
    }

    /// Path or URL the raster was loaded from.
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Declared CRS, if the GeoKeys name one.
    pub fn crs(&self) -> Option<&Crs> {
        self.crs.as_ref()
    }

    /// Dimensions in pixels as (width, height).
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of bands (samples per pixel).
    pub fn band_count(&self) -> u32 {
        self.bands
    }

    /// GDAL no-data value, if declared.
    pub fn no_data(&self) -> Option<f64> {
        self.no_data
    }

    /// Pixel-to-CRS affine transform.
    pub fn geotransform(&self) -> GeoTransform {
        self.transform
    }

    /// Pixel size in CRS units as (width, height), both positive.
    pub fn resolution(&self) -> (f64, f64) {
        let c = &self.transform.0;
        (c[1].hypot(c[4]), c[2].hypot(c[5]))
    }

    /// Extent covered by the outer pixel edges.
    pub fn bounds(&self) -> Bounds {
        let (w, h) = (self.width as f64, self.height as f64);
        let corners = [
            self.transform.apply(0.0, 0.0),
            self.transform.apply(w, 0.0),
            self.transform.apply(0.0, h),
            self.transform.apply(w, h),
        ];
        let mut bounds = Bounds {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for (x, y) in corners {
            bounds.min_x = bounds.min_x.min(x);
            bounds.min_y = bounds.min_y.min(y);
            bounds.max_x = bounds.max_x.max(x);
            bounds.max_y = bounds.max_y.max(y);
        }
        bounds
    }
}

/// Read the GeoKey directory as (key id, short value) pairs.
///
/// Keys stored out of line (doubles or ASCII) are skipped; everything this
/// crate needs is a short.
fn read_geokeys<R: Read + Seek>(decoder: &mut Decoder<R>) -> Vec<(u16, u16)> {
    let Ok(dir) = decoder.get_tag_u16_vec(Tag::from_u16_exhaustive(TAG_GEO_KEY_DIRECTORY)) else {
        return Vec::new();
    };
    if dir.len() < 4 {
        return Vec::new();
    }
    let count = dir[3] as usize;
    dir[4..]
        .chunks_exact(4)
        .take(count)
        .filter(|entry| entry[1] == 0)
        .map(|entry| (entry[0], entry[3]))
        .collect()
}

fn geokey(keys: &[(u16, u16)], id: u16) -> Option<u16> {
    keys.iter().find(|(key, _)| *key == id).map(|(_, value)| *value)
}

fn crs_from_geokeys(keys: &[(u16, u16)]) -> Option<Crs> {
    let defined = |code: u16| (code != 0 && code != USER_DEFINED).then_some(code);
    geokey(keys, KEY_PROJECTED_CS_TYPE)
        .and_then(defined)
        .or_else(|| geokey(keys, KEY_GEOGRAPHIC_TYPE).and_then(defined))
        .map(Crs::Epsg)
}

/// Read the geotransform from ModelPixelScale + ModelTiepoint, or from
/// ModelTransformation.
fn read_geotransform<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    geokeys: &[(u16, u16)],
    source_name: &str,
) -> Result<GeoTransform> {
    let tiepoint = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_TIEPOINT));
    let pixel_scale = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_PIXEL_SCALE));

    let mut transform = match (tiepoint, pixel_scale) {
        (Ok(tie), Ok(scale)) if tie.len() >= 6 && scale.len() >= 2 => {
            // Tiepoint format: [i, j, k, x, y, z] ties pixel (i, j) to (x, y)
            let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
            let (sx, sy) = (scale[0], scale[1]);
            GeoTransform([x - i * sx, sx, 0.0, y + j * sy, 0.0, -sy])
        }
        _ => {
            let matrix = decoder
                .get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_TRANSFORMATION))
                .map_err(|_| RasterError::InvalidGeoTiff {
                    source_name: source_name.to_string(),
                    reason: "no ModelTiepoint/ModelPixelScale or ModelTransformation tags"
                        .to_string(),
                })?;
            if matrix.len() < 16 {
                return Err(RasterError::InvalidGeoTiff {
                    source_name: source_name.to_string(),
                    reason: format!("ModelTransformation has {} values", matrix.len()),
                });
            }
            if matrix[1] != 0.0 || matrix[4] != 0.0 {
                return Err(RasterError::UnsupportedLayout {
                    source_name: source_name.to_string(),
                    reason: "rotated rasters are not supported".to_string(),
                });
            }
            GeoTransform([matrix[3], matrix[0], matrix[1], matrix[7], matrix[4], matrix[5]])
        }
    };

    let c = &transform.0;
    if c[1] == 0.0 || c[5] == 0.0 || c.iter().any(|v| !v.is_finite()) {
        return Err(RasterError::InvalidGeoTiff {
            source_name: source_name.to_string(),
            reason: format!("degenerate geotransform {c:?}"),
        });
    }

    // PixelIsPoint ties pixel centres; move the origin to the pixel corner
    if geokey(geokeys, KEY_RASTER_TYPE) == Some(RASTER_PIXEL_IS_POINT) {
        let c = &mut transform.0;
        c[0] -= 0.5 * c[1] + 0.5 * c[2];
        c[3] -= 0.5 * c[4] + 0.5 * c[5];
    }

    Ok(transform)
}

/// Widen decoded samples to f64.
fn decode_samples(result: DecodingResult) -> Vec<f64> {
    match result {
        DecodingResult::F32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::F64(data) => data,
        DecodingResult::I16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U8(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I8(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f64).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f64).collect(),
    }
}

/// Recover a range read failure the decoder saw as an I/O error.
fn read_error(err: TiffError) -> RasterError {
    let TiffError::IoError(io) = err else {
        return RasterError::TiffDecode(err);
    };
    if !io.get_ref().is_some_and(|inner| inner.is::<RasterError>()) {
        return RasterError::TiffDecode(TiffError::IoError(io));
    }
    let kind = io.kind();
    match io.into_inner().map(|inner| inner.downcast::<RasterError>()) {
        Some(Ok(inner)) => *inner,
        Some(Err(other)) => RasterError::Io(std::io::Error::new(kind, other)),
        None => RasterError::Io(kind.into()),
    }
}

/// Read the no-data value from the GDAL_NODATA tag (stored as ASCII).
fn read_nodata_value<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    let text = decoder
        .get_tag_ascii_string(Tag::from_u16_exhaustive(TAG_GDAL_NODATA))
        .ok()?;
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if text.eq_ignore_ascii_case("nan") {
        // NaN pixels are already treated as missing
        return None;
    }
    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tiff::encoder::colortype::{Gray32Float, RGB32Float};
    use tiff::encoder::TiffEncoder;

    fn geokeys_for(epsg: u16, pixel_is_point: bool) -> Vec<u16> {
        let key = if epsg == 4326 { KEY_GEOGRAPHIC_TYPE } else { KEY_PROJECTED_CS_TYPE };
        let raster_type = if pixel_is_point { RASTER_PIXEL_IS_POINT } else { 1 };
        vec![1, 1, 0, 2, KEY_RASTER_TYPE, 0, 1, raster_type, key, 0, 1, epsg]
    }

    /// 4x3 single-band float raster, origin (10, 50), 1 unit pixels.
    fn gray_tiff(nodata: Option<&str>, geokeys: Vec<u16>) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
        {
            let mut encoder = TiffEncoder::new(&mut buf).expect("encoder");
            let mut image = encoder.new_image::<Gray32Float>(4, 3).expect("image");
            let dir = image.encoder();
            dir.write_tag(Tag::Unknown(TAG_MODEL_PIXEL_SCALE), &[1.0f64, 1.0, 0.0][..])
                .expect("scale");
            dir.write_tag(
                Tag::Unknown(TAG_MODEL_TIEPOINT),
                &[0.0f64, 0.0, 0.0, 10.0, 50.0, 0.0][..],
            )
            .expect("tiepoint");
            dir.write_tag(Tag::Unknown(TAG_GEO_KEY_DIRECTORY), &geokeys[..])
                .expect("geokeys");
            if let Some(nodata) = nodata {
                dir.write_tag(Tag::Unknown(TAG_GDAL_NODATA), nodata).expect("nodata");
            }
            image.write_data(&data).expect("write");
        }
        buf.into_inner()
    }

    #[test]
    fn test_decode_georeferencing() {
        let raster = Raster::from_bytes(&gray_tiff(None, geokeys_for(4326, false)), "mem")
            .expect("Should decode");

        assert_eq!(raster.dimensions(), (4, 3));
        assert_eq!(raster.band_count(), 1);
        assert_eq!(raster.crs(), Some(&Crs::Epsg(4326)));
        assert_eq!(raster.no_data(), None);

        let bounds = raster.bounds();
        assert_abs_diff_eq!(bounds.min_x, 10.0);
        assert_abs_diff_eq!(bounds.max_x, 14.0);
        assert_abs_diff_eq!(bounds.min_y, 47.0);
        assert_abs_diff_eq!(bounds.max_y, 50.0);
        assert_eq!(raster.resolution(), (1.0, 1.0));
    }

    #[test]
    fn test_nearest_pixel_sampling() {
        let raster = Raster::from_bytes(&gray_tiff(None, geokeys_for(4326, false)), "mem")
            .expect("Should decode");

        // Row 0, col 0
        assert_eq!(raster.sample_nearest(10.2, 49.9, 1).unwrap(), Some(0.0));
        // Row 1, col 2: floor, not rounding
        assert_eq!(raster.sample_nearest(12.9, 48.1, 1).unwrap(), Some(6.0));
        // Row 2, col 3
        assert_eq!(raster.sample_nearest(13.5, 47.5, 1).unwrap(), Some(11.0));
    }

    #[test]
    fn test_out_of_extent_is_missing() {
        let raster = Raster::from_bytes(&gray_tiff(None, geokeys_for(4326, false)), "mem")
            .expect("Should decode");

        assert_eq!(raster.sample_nearest(9.99, 49.0, 1).unwrap(), None);
        assert_eq!(raster.sample_nearest(14.0, 49.0, 1).unwrap(), None);
        assert_eq!(raster.sample_nearest(12.0, 50.5, 1).unwrap(), None);
        assert_eq!(raster.sample_nearest(12.0, 46.9, 1).unwrap(), None);
    }

    #[test]
    fn test_nodata_is_missing() {
        let raster = Raster::from_bytes(&gray_tiff(Some("5"), geokeys_for(4326, false)), "mem")
            .expect("Should decode");
        assert_eq!(raster.no_data(), Some(5.0));

        // Pixel (row 1, col 1) holds 5.0
        assert_eq!(raster.sample_nearest(11.5, 48.5, 1).unwrap(), None);
        assert_eq!(raster.sample_nearest(12.5, 48.5, 1).unwrap(), Some(6.0));
    }

    #[test]
    fn test_band_out_of_range() {
        let raster = Raster::from_bytes(&gray_tiff(None, geokeys_for(4326, false)), "mem")
            .expect("Should decode");

        let err = raster.sample_nearest(11.0, 49.0, 0).unwrap_err();
        assert!(matches!(err, RasterError::BandOutOfRange { band: 0, .. }));
        let err = raster.sample_points(&[(11.0, 49.0)], 2).unwrap_err();
        assert!(matches!(err, RasterError::BandOutOfRange { band: 2, bands: 1, .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_batch_sampling_preserves_order() {
        let raster = Raster::from_bytes(&gray_tiff(None, geokeys_for(4326, false)), "mem")
            .expect("Should decode");

        let values = raster
            .sample_points(&[(13.5, 47.5), (0.0, 0.0), (10.5, 49.5)], 1)
            .unwrap();
        assert_eq!(values, vec![Some(11.0), None, Some(0.0)]);
    }

    #[test]
    fn test_pixel_is_point_shift() {
        let raster = Raster::from_bytes(&gray_tiff(None, geokeys_for(32633, true)), "mem")
            .expect("Should decode");
        assert_eq!(raster.crs(), Some(&Crs::Epsg(32633)));

        let bounds = raster.bounds();
        assert_abs_diff_eq!(bounds.min_x, 9.5);
        assert_abs_diff_eq!(bounds.max_y, 50.5);

        // The tie point is the centre of pixel (0, 0)
        assert_eq!(raster.sample_nearest(10.0, 50.0, 1).unwrap(), Some(0.0));
        assert_eq!(raster.sample_nearest(10.6, 50.0, 1).unwrap(), Some(1.0));
    }

    #[test]
    fn test_user_defined_crs_is_undefined() {
        let raster = Raster::from_bytes(&gray_tiff(None, geokeys_for(USER_DEFINED, false)), "mem")
            .expect("Should decode");
        assert_eq!(raster.crs(), None);

        let raster = raster.with_crs(Crs::Epsg(3857));
        assert_eq!(raster.crs(), Some(&Crs::Epsg(3857)));
    }

    #[test]
    fn test_multiband_sampling() {
        let mut buf = Cursor::new(Vec::new());
        // 2x1 RGB: pixel 0 = (1, 2, 3), pixel 1 = (4, 5, 6)
        let data = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        {
            let mut encoder = TiffEncoder::new(&mut buf).expect("encoder");
            let mut image = encoder.new_image::<RGB32Float>(2, 1).expect("image");
            let dir = image.encoder();
            dir.write_tag(Tag::Unknown(TAG_MODEL_PIXEL_SCALE), &[10.0f64, 10.0, 0.0][..])
                .expect("scale");
            dir.write_tag(
                Tag::Unknown(TAG_MODEL_TIEPOINT),
                &[0.0f64, 0.0, 0.0, 500_000.0, 4_000_000.0, 0.0][..],
            )
            .expect("tiepoint");
            image.write_data(&data).expect("write");
        }

        let raster = Raster::from_bytes(buf.get_ref(), "rgb").expect("Should decode");
        assert_eq!(raster.band_count(), 3);
        assert_eq!(raster.crs(), None);
        assert_eq!(raster.sample_nearest(500_015.0, 3_999_995.0, 1).unwrap(), Some(4.0));
        assert_eq!(raster.sample_nearest(500_015.0, 3_999_995.0, 3).unwrap(), Some(6.0));
        assert_eq!(raster.sample_nearest(500_001.0, 3_999_999.0, 2).unwrap(), Some(2.0));
    }

    #[test]
    fn test_strips_decode_on_demand() {
        // 5x7 raster, 2 rows per strip: the last strip holds a single row
        let mut buf = Cursor::new(Vec::new());
        let data: Vec<f32> = (0..35).map(|v| v as f32).collect();
        {
            let mut encoder = TiffEncoder::new(&mut buf).expect("encoder");
            let mut image = encoder.new_image::<Gray32Float>(5, 7).expect("image");
            image.rows_per_strip(2).expect("rows per strip");
            let dir = image.encoder();
            dir.write_tag(Tag::Unknown(TAG_MODEL_PIXEL_SCALE), &[1.0f64, 1.0, 0.0][..])
                .expect("scale");
            dir.write_tag(
                Tag::Unknown(TAG_MODEL_TIEPOINT),
                &[0.0f64, 0.0, 0.0, 0.0, 7.0, 0.0][..],
            )
            .expect("tiepoint");
            image.write_data(&data).expect("write");
        }

        let raster = Raster::from_bytes(buf.get_ref(), "strips").expect("Should decode");
        assert_eq!(raster.chunk_dimensions(), (5, 2));

        // Row 6 lives in the short final strip
        assert_eq!(raster.sample_nearest(4.5, 0.5, 1).unwrap(), Some(34.0));
        // Rows 2 and 3 share a strip
        assert_eq!(raster.sample_nearest(1.5, 4.5, 1).unwrap(), Some(11.0));
        assert_eq!(raster.sample_nearest(3.5, 3.5, 1).unwrap(), Some(18.0));
        assert_eq!(raster.sample_nearest(0.5, 6.5, 1).unwrap(), Some(0.0));

        let cached = raster.cache.lock().expect("cache").chunks.len();
        assert_eq!(cached, 3);
    }

    #[test]
    fn test_missing_georeferencing_is_invalid() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut buf).expect("encoder");
            encoder
                .write_image::<Gray32Float>(2, 2, &[0.0, 1.0, 2.0, 3.0])
                .expect("write");
        }
        let err = Raster::from_bytes(buf.get_ref(), "plain").unwrap_err();
        assert!(matches!(err, RasterError::InvalidGeoTiff { .. }));
    }

    #[test]
    fn test_geotransform_inverse() {
        let gt = GeoTransform::north_up(100.0, 200.0, 2.0, 4.0);
        let (x, y) = gt.apply(3.5, 1.25);
        let (col, row) = gt.invert(x, y).unwrap();
        assert_abs_diff_eq!(col, 3.5, epsilon = 1e-12);
        assert_abs_diff_eq!(row, 1.25, epsilon = 1e-12);
    }
}
