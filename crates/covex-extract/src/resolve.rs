//! Tile resolution: label each point with the tile that covers it.
//!
//! Points are reprojected into the footprint index CRS, the index is clipped
//! to the points' extent, and each point is matched against the clipped
//! footprints. This is a left join: every point comes out exactly once, with
//! `None` when no footprint covers it.

use crate::footprint::{locate, FootprintIndex};
use crate::points::{PointId, PointRecord, PointSet};
use crate::Result;
use covex_raster::{Crs, Transformer};
use geo_types::{Point, Rect};
use rayon::prelude::*;
use tracing::{debug, info, warn};

/// Path of the tile covering a point, as stored in the footprint index.
pub type TileRef = String;

/// A point set joined against a footprint index.
///
/// Holding one of these is proof the spatial join has been done; it can be
/// reused for any number of extraction years.
#[derive(Debug, Clone)]
pub struct ResolvedPointSet {
    points: PointSet,
    tiles: Vec<Option<TileRef>>,
    index_crs: Crs,
}

impl ResolvedPointSet {
    /// The original points, untouched by the join.
    pub fn points(&self) -> &PointSet {
        &self.points
    }

    /// Tile reference per point, in id order.
    pub fn tiles(&self) -> &[Option<TileRef>] {
        &self.tiles
    }

    /// Tile reference of one point.
    pub fn tile(&self, id: PointId) -> Option<&str> {
        self.tiles.get(id.0)?.as_deref()
    }

    /// CRS of the index the points were resolved against.
    pub fn index_crs(&self) -> &Crs {
        &self.index_crs
    }

    /// Records paired with their tile reference.
    pub fn iter(&self) -> impl Iterator<Item = (&PointRecord, Option<&str>)> {
        self.points
            .records()
            .iter()
            .zip(self.tiles.iter().map(Option::as_deref))
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether there are no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points with no covering tile.
    pub fn unresolved_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_none()).count()
    }

    /// Hand back the points, dropping the tile labels.
    pub fn into_points(self) -> PointSet {
        self.points
    }
}

/// Resolve every point against `index`.
///
/// Returns the resolved set and whether any point is left without a tile.
/// An undefined point CRS is an error; a single point that fails to project
/// is left unresolved.
pub fn resolve(points: PointSet, index: &FootprintIndex) -> Result<(ResolvedPointSet, bool)> {
    let transformer = Transformer::new(points.crs(), Some(index.crs()))?;

    let projected: Vec<Option<Point<f64>>> = points
        .records()
        .iter()
        .map(|record| {
            let (x, y) = record.point.x_y();
            match transformer.transform(x, y) {
                Ok((px, py)) => Some(Point::new(px, py)),
                Err(e) => {
                    warn!(point = %record.id, error = %e, "point does not project into index CRS");
                    None
                }
            }
        })
        .collect();

    let tiles: Vec<Option<TileRef>> = match extent(&projected) {
        Some(rect) => {
            let clipped = index.clip(&rect);
            debug!(
                footprints = index.len(),
                clipped = clipped.len(),
                "clipped footprint index to point extent"
            );
            projected
                .par_iter()
                .map(|point| {
                    let point = point.as_ref()?;
                    locate(&clipped, point).map(|footprint| footprint.tile_ref.clone())
                })
                .collect()
        }
        None => vec![None; projected.len()],
    };

    let resolved = ResolvedPointSet {
        points,
        tiles,
        index_crs: index.crs().clone(),
    };

    let unresolved = resolved.unresolved_count();
    info!(
        points = resolved.len(),
        unresolved, "resolved points against footprint index"
    );

    Ok((resolved, unresolved > 0))
}

/// Bounding rectangle of the points that projected.
fn extent(points: &[Option<Point<f64>>]) -> Option<Rect<f64>> {
    let mut iter = points.iter().flatten();
    let first = iter.next()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x(), first.y(), first.x(), first.y());
    for p in iter {
        min_x = min_x.min(p.x());
        min_y = min_y.min(p.y());
        max_x = max_x.max(p.x());
        max_y = max_y.max(p.y());
    }
    Some(Rect::new((min_x, min_y), (max_x, max_y)))
}
