//! Tiled and untiled extraction drivers.
//!
//! The tiled driver is a map-reduce over point ids. Points are grouped by the
//! tile path they resolve to for the requested year, each group opens its
//! tile once in a scoped session and samples its points, and the per-point
//! outcomes are sorted back into id order before they become a column.
//! Groups run in parallel on the rayon pool.
//!
//! Failure policy:
//! - Configuration problems abort the whole run: an invalid descriptor, a
//!   point set without a usable CRS, a tile that declares no CRS, a band the
//!   tile does not have.
//! - Anything that concerns a single point or a single tile is recorded as
//!   that point's outcome and the run continues. That covers tiles that
//!   cannot be opened, tiles whose EPSG code has no projection definition and
//!   strips or tiles that fail to read while sampling.

use crate::descriptor::RasterDescriptor;
use crate::points::{PointId, PointSet};
use crate::resolve::ResolvedPointSet;
use crate::summary::ExtractionColumn;
use crate::Result;
use covex_raster::{Crs, Raster, RasterError, RasterRef, RasterSource, Transformer};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// What happened to one point in one extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum PointOutcome {
    /// A value was sampled.
    Sampled(f64),
    /// The point's raster was read but the pixel is no-data or off the extent.
    NoData,
    /// No tile covers the point.
    Uncovered,
    /// The point could not be sampled.
    Failed(String),
}

impl PointOutcome {
    /// Sampled value, or `None` for the missing-value sentinel.
    pub fn value(&self) -> Option<f64> {
        match self {
            PointOutcome::Sampled(v) => Some(*v),
            _ => None,
        }
    }

    fn from_sample(sample: Option<f64>) -> Self {
        match sample {
            Some(v) => PointOutcome::Sampled(v),
            None => PointOutcome::NoData,
        }
    }
}

/// Extract one column from tiled rasters for an already-resolved point set.
///
/// With `year` set, the year token is substituted in each tile path and in
/// the column name. The result has exactly one value per point, in id order.
pub fn extract_tiled(
    resolved: &ResolvedPointSet,
    descriptor: &RasterDescriptor,
    source: &RasterSource,
    year: Option<i32>,
) -> Result<ExtractionColumn> {
    descriptor.validate(year)?;
    let storage = descriptor.storage()?;
    let column = descriptor.column_name(year)?;
    let points = resolved.points();
    let point_crs = require_crs(points)?;
    point_crs.proj_string()?;

    // Map: route each point to its tile, or settle it right away
    let mut outcomes: Vec<(PointId, PointOutcome)> = Vec::with_capacity(points.len());
    let mut groups: BTreeMap<String, Vec<PointId>> = BTreeMap::new();
    for (record, tile) in resolved.iter() {
        let Some(tile) = tile else {
            outcomes.push((record.id, PointOutcome::Uncovered));
            continue;
        };
        match descriptor.tile_template(tile).resolve(year) {
            Ok(path) => groups.entry(path.into_owned()).or_default().push(record.id),
            Err(e) => {
                warn!(point = %record.id, tile, error = %e, "malformed tile reference");
                outcomes.push((record.id, PointOutcome::Failed(e.to_string())));
            }
        }
    }

    debug!(
        column = %column,
        tiles = groups.len(),
        settled = outcomes.len(),
        "sampling tile groups"
    );

    let sampled = groups
        .into_par_iter()
        .map(|(path, ids)| {
            let reference = descriptor.tile_raster_ref(storage, &path);
            sample_tile(source, &reference, points, point_crs, &ids, descriptor.band)
        })
        .collect::<Result<Vec<_>>>()?;
    outcomes.extend(sampled.into_iter().flatten());

    // Reduce: back into id order
    outcomes.sort_by_key(|(id, _)| *id);
    let outcomes: Vec<PointOutcome> = outcomes.into_iter().map(|(_, o)| o).collect();
    let column = ExtractionColumn::from_outcomes(column, &outcomes);

    info!(column = %column.name, "{}", column.summary);
    Ok(column)
}

/// Sample every point routed to one tile inside a single scoped session.
fn sample_tile(
    source: &RasterSource,
    reference: &RasterRef,
    points: &PointSet,
    point_crs: &Crs,
    ids: &[PointId],
    band: u32,
) -> Result<Vec<(PointId, PointOutcome)>> {
    let session = match source.open(reference) {
        Ok(session) => session,
        Err(e) => {
            warn!(tile = %reference, points = ids.len(), error = %e, "failed to read tile");
            let reason = e.to_string();
            return Ok(ids
                .iter()
                .map(|&id| (id, PointOutcome::Failed(reason.clone())))
                .collect());
        }
    };
    let raster = session.raster();
    let to_tile = match Transformer::new(Some(point_crs), Some(require_raster_crs(raster)?)) {
        Ok(to_tile) => to_tile,
        Err(e @ RasterError::UnsupportedCrs(_)) => {
            warn!(tile = %reference, points = ids.len(), error = %e, "tile CRS has no definition");
            let reason = e.to_string();
            return Ok(ids
                .iter()
                .map(|&id| (id, PointOutcome::Failed(reason.clone())))
                .collect());
        }
        Err(e) => return Err(e.into()),
    };

    ids.iter()
        .map(|&id| {
            let Some(record) = points.record(id) else {
                return Ok((id, PointOutcome::Failed(format!("no point with id {id}"))));
            };
            let (x, y) = record.point.x_y();
            let outcome = match to_tile.transform(x, y) {
                Ok((tx, ty)) => sample_outcome(raster, tx, ty, band)?,
                Err(e) => {
                    warn!(point = %id, tile = %reference, error = %e, "point does not project into tile CRS");
                    PointOutcome::Failed(e.to_string())
                }
            };
            Ok((id, outcome))
        })
        .collect()
}

/// Sample one point; read failures settle the point, configuration errors
/// abort.
fn sample_outcome(raster: &Raster, x: f64, y: f64, band: u32) -> Result<PointOutcome> {
    match raster.sample_nearest(x, y, band) {
        Ok(sample) => Ok(PointOutcome::from_sample(sample)),
        Err(e) if e.is_configuration() => Err(e.into()),
        Err(e) => {
            warn!(raster = %raster.source_name(), x, y, error = %e, "failed to sample point");
            Ok(PointOutcome::Failed(e.to_string()))
        }
    }
}

/// Extract one column from a single untiled raster.
///
/// The raster is opened once and the whole point set is reprojected into its
/// CRS in one batch. Failing to open the raster is fatal here, since every
/// point depends on it; a strip or tile that fails to read only fails the
/// points inside it.
pub fn extract_untiled(
    points: &PointSet,
    descriptor: &RasterDescriptor,
    source: &RasterSource,
    year: Option<i32>,
) -> Result<ExtractionColumn> {
    descriptor.validate(year)?;
    let column = descriptor.column_name(year)?;
    let reference = descriptor.untiled_raster_ref(year)?;
    let point_crs = require_crs(points)?;

    let session = source.open(&reference)?;
    let raster = session.raster();
    let to_raster = Transformer::new(Some(point_crs), Some(require_raster_crs(raster)?))?;

    let coords = points.coords();
    let outcomes: Vec<PointOutcome> = match to_raster.transform_all(&coords) {
        Ok(projected) => projected
            .iter()
            .map(|&(rx, ry)| sample_outcome(raster, rx, ry, descriptor.band))
            .collect::<Result<_>>()?,
        Err(e) => {
            // Some point does not project; settle them one by one
            debug!(error = %e, "batch reprojection failed, falling back to per-point");
            coords
                .iter()
                .map(|&(x, y)| match to_raster.transform(x, y) {
                    Ok((rx, ry)) => sample_outcome(raster, rx, ry, descriptor.band),
                    Err(e) => Ok(PointOutcome::Failed(e.to_string())),
                })
                .collect::<Result<_>>()?
        }
    };
    drop(session);

    let column = ExtractionColumn::from_outcomes(column, &outcomes);
    info!(column = %column.name, raster = %reference, "{}", column.summary);
    Ok(column)
}

fn require_crs(points: &PointSet) -> Result<&Crs> {
    points.crs().ok_or_else(|| {
        RasterError::CrsUndefined {
            context: "point set".to_string(),
        }
        .into()
    })
}

fn require_raster_crs(raster: &Raster) -> Result<&Crs> {
    raster.crs().ok_or_else(|| {
        RasterError::CrsUndefined {
            context: format!("raster {}", raster.source_name()),
        }
        .into()
    })
}
