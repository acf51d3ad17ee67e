//! Error types for the extraction crate.

use covex_raster::RasterError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort an extraction run.
///
/// Per-point problems (no covering tile, unreadable tile, a point that does
/// not project) never surface here; they are recorded as point outcomes.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Raster, CRS or remote access error.
    #[error(transparent)]
    Raster(#[from] RasterError),

    /// I/O error reading a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed GeoJSON footprint index.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// Malformed YAML raster catalog.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Storage location class other than `local` or `remote`.
    #[error("Unknown storage location '{0}' (expected 'local' or 'remote')")]
    UnknownStorageLocation(String),

    /// Named raster is not in the catalog.
    #[error("No raster descriptor named '{0}'")]
    MissingDescriptor(String),

    /// Descriptor fields are inconsistent.
    #[error("Invalid raster descriptor: {0}")]
    InvalidDescriptor(String),

    /// A year was requested but the template has nothing to substitute.
    #[error("Template '{template}' does not contain the year token '{token}'")]
    TemplateMissingToken {
        /// The template string.
        template: String,
        /// The token that was expected.
        token: String,
    },

    /// The template has a year placeholder but no year was given.
    #[error("Template '{template}' needs a year")]
    YearRequired {
        /// The template string.
        template: String,
    },

    /// An extracted column does not line up with the point set.
    #[error("Column '{column}' has {actual} values for {expected} points")]
    ColumnLength {
        /// Column name.
        column: String,
        /// Number of points.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },

    /// A point record does not match the set's property columns.
    #[error("Point {index} has {actual} properties, expected {expected}")]
    PropertyCount {
        /// Row index of the point.
        index: usize,
        /// Number of property columns.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },

    /// The footprint index cannot be used.
    #[error("Footprint index {path}: {reason}")]
    FootprintIndex {
        /// Path of the index file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },
}

impl ExtractError {
    /// Whether this is a configuration problem rather than a data problem.
    pub fn is_configuration(&self) -> bool {
        match self {
            ExtractError::Raster(e) => e.is_configuration(),
            ExtractError::UnknownStorageLocation(_)
            | ExtractError::MissingDescriptor(_)
            | ExtractError::InvalidDescriptor(_)
            | ExtractError::TemplateMissingToken { .. }
            | ExtractError::YearRequired { .. } => true,
            _ => false,
        }
    }
}
