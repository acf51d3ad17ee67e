//! Tile footprint index.
//!
//! A footprint index is a GeoJSON `FeatureCollection` with one polygon per
//! raster tile and a string property holding the tile's path. It is loaded
//! once and shared read-only across workers.

use crate::{ExtractError, Result};
use covex_raster::{Crs, WGS84};
use geo::coordinate_position::{CoordPos, CoordinatePosition};
use geo::BoundingRect;
use geo_types::{Geometry, MultiPolygon, Point, Rect};
use geojson::{Feature, GeoJson, JsonObject};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default property holding the tile path.
pub const DEFAULT_TILE_FIELD: &str = "location";

/// Coverage polygon of one raster tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileFootprint {
    /// Coverage in the index CRS.
    pub polygon: MultiPolygon<f64>,
    /// Tile path or URL, possibly containing a year token.
    pub tile_ref: String,
    bbox: Rect<f64>,
}

impl TileFootprint {
    /// Create a footprint. Returns `None` for an empty polygon.
    pub fn new(polygon: MultiPolygon<f64>, tile_ref: impl Into<String>) -> Option<Self> {
        let bbox = polygon.bounding_rect()?;
        Some(Self {
            polygon,
            tile_ref: tile_ref.into(),
            bbox,
        })
    }

    /// Bounding rectangle of the polygon.
    pub fn bbox(&self) -> Rect<f64> {
        self.bbox
    }

    /// Whether the footprint covers a point (boundary included).
    pub fn covers(&self, point: &Point<f64>) -> bool {
        let (min, max) = (self.bbox.min(), self.bbox.max());
        point.x() >= min.x
            && point.x() <= max.x
            && point.y() >= min.y
            && point.y() <= max.y
            && self.polygon.coordinate_position(&point.0) != CoordPos::Outside
    }

    /// Whether the point lies strictly inside the polygon.
    pub fn contains_interior(&self, point: &Point<f64>) -> bool {
        self.polygon.coordinate_position(&point.0) == CoordPos::Inside
    }

    /// Whether the point falls in the half-open extent: west and north
    /// edges included, east and south edges excluded, as in pixel lookup.
    pub fn extent_holds(&self, point: &Point<f64>) -> bool {
        let (min, max) = (self.bbox.min(), self.bbox.max());
        point.x() >= min.x && point.x() < max.x && point.y() > min.y && point.y() <= max.y
    }
}

/// Pick the footprint a point belongs to among `footprints`.
///
/// A footprint holding the point in its interior wins. A point on a boundary
/// goes to a covering footprint whose half-open extent holds it, so a point
/// on an edge shared by two tiles lands in the tile whose pixels contain it.
/// Otherwise the first covering footprint in index order is used.
pub fn locate<'a>(
    footprints: &[&'a TileFootprint],
    point: &Point<f64>,
) -> Option<&'a TileFootprint> {
    let covering: Vec<&'a TileFootprint> = footprints
        .iter()
        .copied()
        .filter(|footprint| footprint.covers(point))
        .collect();
    covering
        .iter()
        .find(|footprint| footprint.contains_interior(point))
        .or_else(|| covering.iter().find(|footprint| footprint.extent_holds(point)))
        .or_else(|| covering.first())
        .copied()
}

/// Read-only collection of tile footprints in one CRS.
#[derive(Debug, Clone)]
pub struct FootprintIndex {
    crs: Crs,
    footprints: Vec<TileFootprint>,
    skipped: usize,
}

impl FootprintIndex {
    /// Build an index from footprints already in `crs`.
    pub fn new(crs: Crs, footprints: Vec<TileFootprint>) -> Self {
        Self {
            crs,
            footprints,
            skipped: 0,
        }
    }

    /// Load an index from a GeoJSON file.
    pub fn from_path<P: AsRef<Path>>(
        path: P,
        tile_field: &str,
        crs_override: Option<Crs>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let index = Self::from_geojson_str(&text, tile_field, crs_override).map_err(|e| match e {
            ExtractError::GeoJson(e) => ExtractError::FootprintIndex {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
            ExtractError::FootprintIndex { reason, .. } => ExtractError::FootprintIndex {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        debug!(
            path = %path.display(),
            footprints = index.len(),
            skipped = index.skipped(),
            crs = %index.crs(),
            "loaded footprint index"
        );
        Ok(index)
    }

    /// Parse an index from GeoJSON text.
    ///
    /// The CRS is taken from `crs_override`, then from the legacy `crs`
    /// member of the collection, then defaults to EPSG:4326.
    pub fn from_geojson_str(
        text: &str,
        tile_field: &str,
        crs_override: Option<Crs>,
    ) -> Result<Self> {
        let (features, foreign) = match text.parse::<GeoJson>()? {
            GeoJson::FeatureCollection(collection) => {
                (collection.features, collection.foreign_members)
            }
            GeoJson::Feature(feature) => (vec![feature], None),
            GeoJson::Geometry(_) => {
                return Err(ExtractError::FootprintIndex {
                    path: PathBuf::new(),
                    reason: "expected features, found a bare geometry".to_string(),
                })
            }
        };

        let crs = match crs_override {
            Some(crs) => crs,
            None => foreign
                .as_ref()
                .and_then(legacy_crs_member)
                .transpose()?
                .unwrap_or(WGS84),
        };

        let mut footprints = Vec::with_capacity(features.len());
        let mut skipped = 0;
        for (i, feature) in features.into_iter().enumerate() {
            match footprint_from_feature(feature, tile_field) {
                Ok(footprint) => footprints.push(footprint),
                Err(reason) => {
                    warn!(feature = i, %reason, "skipping footprint");
                    skipped += 1;
                }
            }
        }

        Ok(Self {
            crs,
            footprints,
            skipped,
        })
    }

    /// CRS of the footprint polygons.
    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    /// All footprints in index order.
    pub fn footprints(&self) -> &[TileFootprint] {
        &self.footprints
    }

    /// Number of usable footprints.
    pub fn len(&self) -> usize {
        self.footprints.len()
    }

    /// Whether the index has no usable footprints.
    pub fn is_empty(&self) -> bool {
        self.footprints.is_empty()
    }

    /// Features dropped while loading.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Footprints whose extent intersects `rect`, in index order.
    pub fn clip(&self, rect: &Rect<f64>) -> Vec<&TileFootprint> {
        self.footprints
            .iter()
            .filter(|f| rects_overlap(&f.bbox, rect))
            .collect()
    }
}

fn rects_overlap(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x && b.min().x <= a.max().x && a.min().y <= b.max().y && b.min().y <= a.max().y
}

fn footprint_from_feature(
    feature: Feature,
    tile_field: &str,
) -> std::result::Result<TileFootprint, String> {
    // Numeric tile ids are accepted as their decimal text
    let tile_ref = match feature.property(tile_field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => return Err(format!("'{tile_field}' is not a string")),
        None => return Err(format!("no '{tile_field}' property")),
    };

    let geometry = feature
        .geometry
        .ok_or_else(|| "feature has no geometry".to_string())?;
    let polygon = match Geometry::<f64>::try_from(geometry).map_err(|e| e.to_string())? {
        Geometry::Polygon(p) => MultiPolygon(vec![p]),
        Geometry::MultiPolygon(mp) => mp,
        _ => return Err("geometry is not a polygon".to_string()),
    };

    TileFootprint::new(polygon, tile_ref).ok_or_else(|| "polygon is empty".to_string())
}

/// Read the pre-2016 GeoJSON `crs` member: `{"type": "name", "properties": {"name": ...}}`.
fn legacy_crs_member(foreign: &JsonObject) -> Option<Result<Crs>> {
    let name = foreign
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()?;
    Some(parse_crs_name(name))
}

fn parse_crs_name(name: &str) -> Result<Crs> {
    if name.ends_with("CRS84") {
        return Ok(WGS84);
    }
    if let Some(urn) = name.strip_prefix("urn:ogc:def:crs:EPSG:") {
        let code = urn.rsplit(':').next().unwrap_or(urn);
        return Ok(code.parse::<Crs>()?);
    }
    Ok(name.parse::<Crs>()?)
}
