//! # covex-extract
//!
//! Point-wise extraction of raster values from tiled and untiled rasters.
//!
//! ## Pipeline
//!
//! 1. Build a [`PointSet`] from input locations.
//! 2. For tiled rasters, [`resolve`] the points against a [`FootprintIndex`]
//!    once. The resulting [`ResolvedPointSet`] records which tile (if any)
//!    covers each point.
//! 3. Extract with [`extract_tiled`] (per tile, per year) or
//!    [`extract_untiled`] (one global raster).
//! 4. Collect columns into an [`ExtractionTable`] that keeps every input
//!    point, in input order, with the original coordinates and CRS.
//!
//! [`YearSeries`] wraps steps 2 and 3 so that several years share one
//! spatial join.
//!
//! ## Example
//!
//! ```no_run
//! use covex_extract::{PointSet, RasterCatalog, YearSeries};
//! use covex_raster::{RasterSource, WGS84};
//!
//! let catalog = RasterCatalog::from_path("rasters.yaml")?;
//! let descriptor = catalog.get("tcc")?;
//! let source = RasterSource::with_config(descriptor.source_config())?;
//!
//! let points = PointSet::from_coords(Some(WGS84), [(-105.2, 40.0), (-104.9, 39.7)]);
//! let series = YearSeries::new(points, descriptor, &source)?;
//! let table = series.run(&[2019, 2020])?;
//!
//! for (column, summary) in table.summaries() {
//!     println!("{column}: {summary}");
//! }
//! # Ok::<(), covex_extract::ExtractError>(())
//! ```

mod descriptor;
mod driver;
mod error;
mod footprint;
mod points;
mod resolve;
mod series;
mod summary;
mod template;

pub use descriptor::{RasterCatalog, RasterDescriptor, StorageLocation};
pub use driver::{extract_tiled, extract_untiled, PointOutcome};
pub use error::ExtractError;
pub use footprint::{locate, FootprintIndex, TileFootprint, DEFAULT_TILE_FIELD};
pub use points::{PointId, PointRecord, PointSet};
pub use resolve::{resolve, ResolvedPointSet, TileRef};
pub use series::{run, run_untiled, YearSeries};
pub use summary::{ExtractionColumn, ExtractionSummary, ExtractionTable};
pub use template::{YearTemplate, DEFAULT_YEAR_TOKEN};

/// Result type for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractError>;
