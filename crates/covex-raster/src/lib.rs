//! # covex-raster
//!
//! GeoTIFF point sampling with coordinate reprojection.
//!
//! This crate provides the raster-side building blocks of covex:
//! - [`Crs`] and [`Transformer`] for moving coordinates between reference systems
//! - [`Raster`] for opening a GeoTIFF and sampling the nearest pixel for a band,
//!   decoding only the strips or tiles the points fall in
//! - [`RangeReader`] implementations for byte-range reads from disk, HTTP(S)
//!   and S3
//! - [`RasterSource`] for reading rasters from disk or object storage through
//!   scoped [`RasterSession`]s
//!
//! ## Missing values
//!
//! Sampling returns `Option<f64>`. `None` is the missing-value sentinel and
//! covers points outside the raster extent, no-data pixels and NaN pixels.
//! Out-of-extent is a normal outcome at tile edges, never an error.
//!
//! ## Examples
//!
//! ### Sampling a local raster
//!
//! ```no_run
//! use covex_raster::{Crs, RasterRef, RasterSource, Transformer};
//!
//! let source = RasterSource::new()?;
//! let reference = RasterRef::parse("tiles/tcc_2020_h12v04.tif");
//!
//! let session = source.open(&reference)?;
//! let raster = session.raster();
//!
//! // Points are in WGS84; move them into the raster's own CRS first
//! let to_raster = Transformer::new(Some(&Crs::Epsg(4326)), raster.crs())?;
//! let coords = to_raster.transform_all(&[(-105.2, 40.0), (-104.9, 39.7)])?;
//!
//! let values = raster.sample_points(&coords, 1)?;
//! println!("{:?}", values);
//! # Ok::<(), covex_raster::RasterError>(())
//! ```
//!
//! ### Reading from a public bucket
//!
//! ```no_run
//! use covex_raster::{RasterRef, RasterSource};
//!
//! let source = RasterSource::new()?;
//! let reference = RasterRef::parse("s3://example-bucket/tiles/a.tif");
//! let values = source.sample(&reference, &[(500_000.0, 6_500_000.0)], 1)?;
//! # Ok::<(), covex_raster::RasterError>(())
//! ```

pub mod crs;
mod error;
mod range;
mod raster;
mod source;

pub use crs::{reproject, Crs, Transformer, WGS84};
pub use error::RasterError;
pub use range::{
    HttpRangeReader, LocalRangeReader, RangeCursor, RangeReader, ReadCounters, S3RangeReader,
    BLOCK_SIZE,
};
pub use raster::{Bounds, GeoTransform, Raster, ReadSeek};
pub use source::{
    RasterRef, RasterSession, RasterSource, RemoteAccess, SourceConfig, SourceStats,
    DEFAULT_REGION,
};

/// Result type for raster operations.
pub type Result<T> = std::result::Result<T, RasterError>;
