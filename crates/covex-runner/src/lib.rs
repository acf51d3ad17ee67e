//! # covex-runner
//!
//! Plumbing behind the `covex` binary: reading points from CSV, running an
//! extraction or a tile resolution for one catalog raster, and writing the
//! augmented table back to CSV.
//!
//! Input columns are carried through verbatim, including the coordinate
//! columns, so an output row is always its input row followed by the new
//! columns.

use covex_extract::{
    resolve, run_untiled, ExtractError, ExtractionSummary, FootprintIndex, PointSet,
    RasterCatalog, RasterDescriptor, TileRef, YearSeries,
};
use covex_raster::{Crs, RasterError, RasterSource};
use geo_types::Point;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Missing-value string written when none is configured.
pub const DEFAULT_MISSING: &str = "NaN";

/// Errors surfaced by the `covex` binary.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Column '{column}' not found in {source_name}")]
    MissingColumn { source_name: String, column: String },

    #[error("Invalid {column} value '{value}' on line {line} of {source_name}")]
    InvalidCoordinate {
        source_name: String,
        line: u64,
        column: String,
        value: String,
    },

    #[error("Invalid year list '{0}' (expected comma-separated years such as 2019,2020)")]
    InvalidYears(String),

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// How to read points out of a CSV file.
#[derive(Debug, Clone)]
pub struct PointColumns {
    pub x: String,
    pub y: String,
    pub crs: Crs,
}

impl Default for PointColumns {
    fn default() -> Self {
        Self {
            x: "x".to_string(),
            y: "y".to_string(),
            crs: covex_raster::WGS84,
        }
    }
}

/// Read a point set from a CSV file with a header row.
pub fn read_points<P: AsRef<Path>>(path: P, columns: &PointColumns) -> Result<PointSet> {
    let path = path.as_ref();
    let file = File::open(path)?;
    read_points_from(file, &path.display().to_string(), columns)
}

/// Read a point set from any CSV reader. `source_name` is used in errors.
///
/// Every column, coordinates included, becomes a pass-through property.
pub fn read_points_from<R: Read>(
    reader: R,
    source_name: &str,
    columns: &PointColumns,
) -> Result<PointSet> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| RunnerError::MissingColumn {
                source_name: source_name.to_string(),
                column: name.to_string(),
            })
    };
    let x_idx = position(&columns.x)?;
    let y_idx = position(&columns.y)?;

    let mut points = PointSet::new(Some(columns.crs.clone()), headers);
    for record in reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        let coordinate = |idx: usize, column: &str| -> Result<f64> {
            let raw = record.get(idx).unwrap_or_default().trim();
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| RunnerError::InvalidCoordinate {
                    source_name: source_name.to_string(),
                    line,
                    column: column.to_string(),
                    value: raw.to_string(),
                })
        };
        let x = coordinate(x_idx, &columns.x)?;
        let y = coordinate(y_idx, &columns.y)?;
        let properties = record.iter().map(str::to_string).collect();
        points.push(Point::new(x, y), properties)?;
    }

    debug!(source = source_name, points = points.len(), "read points");
    Ok(points)
}

/// Options for writing an output table.
#[derive(Debug, Clone)]
pub struct TableOutput<'a> {
    /// Written in place of missing values.
    pub missing: &'a str,
    /// Optional per-point tile references and the column name to use.
    pub tile_refs: Option<(&'a str, &'a [Option<TileRef>])>,
}

impl Default for TableOutput<'_> {
    fn default() -> Self {
        Self {
            missing: DEFAULT_MISSING,
            tile_refs: None,
        }
    }
}

/// Write `points` to a CSV file.
///
/// The table goes to a temporary file next to `path` that is renamed into
/// place once complete, so a failed write never leaves a truncated table.
pub fn write_table<P: AsRef<Path>>(path: P, points: &PointSet, output: &TableOutput) -> Result<()> {
    write_atomically(path, |file| write_table_to(file, points, output))
}

/// Run `write` against a temporary sibling of `path`, then rename it over
/// `path`. On error the temporary file is removed and `path` is untouched.
pub fn write_atomically<P, F>(path: P, write: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut File) -> Result<()>,
{
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    write(temp.as_file_mut())?;
    temp.as_file().sync_all()?;

    // Keep the mode of a file being replaced
    if let Ok(existing) = std::fs::metadata(path) {
        temp.as_file().set_permissions(existing.permissions())?;
    }
    temp.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), "wrote table");
    Ok(())
}

/// Write `points` as CSV: properties, then the optional tile column, then
/// one column per attribute.
pub fn write_table_to<W: Write>(writer: W, points: &PointSet, output: &TableOutput) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);

    let mut header: Vec<&str> = points.property_names().iter().map(String::as_str).collect();
    if let Some((name, _)) = output.tile_refs {
        header.push(name);
    }
    header.extend(points.attribute_names().iter().map(String::as_str));
    writer.write_record(&header)?;

    for (i, record) in points.records().iter().enumerate() {
        let mut row: Vec<String> = record.properties.clone();
        if let Some((_, tiles)) = output.tile_refs {
            row.push(tiles.get(i).cloned().flatten().unwrap_or_default());
        }
        for name in points.attribute_names() {
            let value = record.attributes.get(name).copied().flatten();
            row.push(value.map_or_else(|| output.missing.to_string(), |v| v.to_string()));
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Parse `2019,2020` style year lists. Whitespace around entries is ignored.
pub fn parse_years(text: &str) -> Result<Vec<i32>> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i32>().map_err(|_| RunnerError::InvalidYears(text.to_string())))
        .collect()
}

/// One `covex extract` invocation.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub catalog: PathBuf,
    pub raster: String,
    pub points: PathBuf,
    pub output: PathBuf,
    pub years: Vec<i32>,
    pub columns: PointColumns,
    pub keep_tile_ref: bool,
    pub missing: String,
}

/// One `covex resolve` invocation.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub catalog: PathBuf,
    pub raster: String,
    pub points: PathBuf,
    pub output: PathBuf,
    pub columns: PointColumns,
}

/// Outcome of a resolve run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveReport {
    pub total: usize,
    pub resolved: usize,
}

/// Run an extraction and write the table. Returns one summary per column.
pub fn run_extract(request: &ExtractRequest) -> Result<Vec<(String, ExtractionSummary)>> {
    let catalog = RasterCatalog::from_path(&request.catalog)?;
    let descriptor = catalog.get(&request.raster)?;
    let source = RasterSource::with_config(descriptor.source_config())?;
    let points = read_points(&request.points, &request.columns)?;
    info!(
        raster = %request.raster,
        points = points.len(),
        years = ?request.years,
        "starting extraction"
    );

    let mut output = TableOutput {
        missing: &request.missing,
        tile_refs: None,
    };

    let summaries = if descriptor.is_tiled() {
        let series = YearSeries::new(points, descriptor, &source)?;
        let table = series.run(&request.years)?;
        if request.keep_tile_ref {
            output.tile_refs = Some((descriptor.tile_field.as_str(), series.resolved().tiles()));
        }
        write_table(&request.output, table.points(), &output)?;
        table.summaries().to_vec()
    } else {
        let table = run_untiled(points, descriptor, &source, &request.years)?;
        write_table(&request.output, table.points(), &output)?;
        table.summaries().to_vec()
    };

    let stats = source.stats();
    debug!(
        objects = stats.objects_read,
        bytes = stats.bytes_read,
        requests = stats.requests,
        sessions = stats.sessions_opened,
        "raster reads"
    );
    Ok(summaries)
}

/// Resolve points against the raster's footprint index and write the tile
/// reference for each point.
pub fn run_resolve(request: &ResolveRequest) -> Result<ResolveReport> {
    let catalog = RasterCatalog::from_path(&request.catalog)?;
    let descriptor = catalog.get(&request.raster)?;
    let index = load_index(descriptor)?;
    let points = read_points(&request.points, &request.columns)?;

    let (resolved, _) = resolve(points, &index)?;
    let report = ResolveReport {
        total: resolved.len(),
        resolved: resolved.len() - resolved.unresolved_count(),
    };

    let output = TableOutput {
        missing: DEFAULT_MISSING,
        tile_refs: Some((descriptor.tile_field.as_str(), resolved.tiles())),
    };
    write_table(&request.output, resolved.points(), &output)?;
    Ok(report)
}

fn load_index(descriptor: &RasterDescriptor) -> Result<FootprintIndex> {
    let footprint_fn = descriptor.footprint_fn.as_ref().ok_or_else(|| {
        ExtractError::InvalidDescriptor(format!(
            "raster '{}' has no footprint_fn",
            descriptor.data_name
        ))
    })?;
    Ok(FootprintIndex::from_path(
        footprint_fn,
        &descriptor.tile_field,
        descriptor.footprint_crs.clone(),
    )?)
}
