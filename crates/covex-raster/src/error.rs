//! Error types for the raster crate.

use thiserror::Error;

/// Errors that can occur when decoding, reprojecting or reading rasters.
#[derive(Debug, Error)]
pub enum RasterError {
    /// I/O error reading a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding error.
    #[error("TIFF decode error: {0}")]
    TiffDecode(#[from] tiff::TiffError),

    /// Invalid GeoTIFF - missing or inconsistent georeferencing tags.
    #[error("Invalid GeoTIFF {source_name}: {reason}")]
    InvalidGeoTiff {
        /// Path or URL of the raster.
        source_name: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The pixel layout is valid TIFF but cannot be sampled by band.
    #[error("Unsupported raster layout in {source_name}: {reason}")]
    UnsupportedLayout {
        /// Path or URL of the raster.
        source_name: String,
        /// Description of the layout.
        reason: String,
    },

    /// A coordinate reference system was required but not declared.
    #[error("Coordinate reference system is undefined for {context}")]
    CrsUndefined {
        /// What was missing a CRS (point set, raster path, footprint index...).
        context: String,
    },

    /// EPSG code with no known projection definition.
    #[error("Unsupported coordinate reference system {0} (supply a +proj definition instead)")]
    UnsupportedCrs(String),

    /// The projection library rejected a definition or a coordinate.
    #[error("Projection error ({from} -> {to}): {reason}")]
    Projection {
        /// Source CRS.
        from: String,
        /// Target CRS.
        to: String,
        /// Reason reported by the projection library.
        reason: String,
    },

    /// Requested band does not exist in the raster.
    #[error("Band {band} is out of range for {source_name} ({bands} band(s), bands are 1-indexed)")]
    BandOutOfRange {
        /// Requested 1-indexed band.
        band: u32,
        /// Number of bands in the raster.
        bands: u32,
        /// Path or URL of the raster.
        source_name: String,
    },

    /// Malformed remote URL.
    #[error("Invalid remote raster URL: {0}")]
    InvalidUrl(String),

    /// HTTP request error when fetching rasters.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Object store error on a credentialed read.
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Remote server answered but did not deliver the raster.
    #[error("Failed to read remote raster {url}: {reason}")]
    RemoteReadFailed {
        /// URL of the raster.
        url: String,
        /// Reason for failure.
        reason: String,
    },
}

impl RasterError {
    /// Whether this error is a configuration problem that should abort a
    /// whole run rather than mark a single point as failed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RasterError::CrsUndefined { .. }
                | RasterError::UnsupportedCrs(_)
                | RasterError::BandOutOfRange { .. }
        )
    }
}
