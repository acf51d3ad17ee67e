//! Point records and point sets.

use crate::{ExtractError, Result};
use covex_raster::{Crs, Transformer};
use geo::BoundingRect;
use geo_types::{MultiPoint, Point, Rect};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Stable row identifier: the 0-based position of the point in its input.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PointId(pub usize);

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One input location plus everything attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    /// Row identifier.
    pub id: PointId,
    /// Location in the point set's CRS.
    pub point: Point<f64>,
    /// Pass-through input values, aligned with [`PointSet::property_names`].
    pub properties: Vec<String>,
    /// Extracted values by column name. `None` is the missing-value sentinel.
    pub attributes: HashMap<String, Option<f64>>,
}

/// An ordered collection of points sharing one CRS.
///
/// Ids always equal positions: records are only ever appended through
/// [`push`](Self::push), and never removed or reordered.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSet {
    crs: Option<Crs>,
    property_names: Vec<String>,
    attribute_names: Vec<String>,
    records: Vec<PointRecord>,
}

impl PointSet {
    /// Create an empty set with the given pass-through property columns.
    pub fn new(crs: Option<Crs>, property_names: Vec<String>) -> Self {
        Self {
            crs,
            property_names,
            attribute_names: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Create a set from bare coordinates with no properties.
    pub fn from_coords(crs: Option<Crs>, coords: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let mut set = Self::new(crs, Vec::new());
        for (x, y) in coords {
            let id = PointId(set.records.len());
            set.records.push(PointRecord {
                id,
                point: Point::new(x, y),
                properties: Vec::new(),
                attributes: HashMap::new(),
            });
        }
        set
    }

    /// Append a point, returning its id.
    pub fn push(&mut self, point: Point<f64>, properties: Vec<String>) -> Result<PointId> {
        if properties.len() != self.property_names.len() {
            return Err(ExtractError::PropertyCount {
                index: self.records.len(),
                expected: self.property_names.len(),
                actual: properties.len(),
            });
        }
        let id = PointId(self.records.len());
        self.records.push(PointRecord {
            id,
            point,
            properties,
            attributes: HashMap::new(),
        });
        Ok(id)
    }

    /// CRS of every point in the set.
    pub fn crs(&self) -> Option<&Crs> {
        self.crs.as_ref()
    }

    /// Names of the pass-through property columns.
    pub fn property_names(&self) -> &[String] {
        &self.property_names
    }

    /// Names of the extracted columns, in the order they were appended.
    pub fn attribute_names(&self) -> &[String] {
        &self.attribute_names
    }

    /// All records in id order.
    pub fn records(&self) -> &[PointRecord] {
        &self.records
    }

    /// Look up a record by id.
    pub fn record(&self, id: PointId) -> Option<&PointRecord> {
        self.records.get(id.0)
    }

    /// Ids of every point, in order.
    pub fn ids(&self) -> impl Iterator<Item = PointId> + '_ {
        self.records.iter().map(|r| r.id)
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the set has no points.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Coordinates in the set's own CRS.
    pub fn coords(&self) -> Vec<(f64, f64)> {
        self.records.iter().map(|r| r.point.x_y()).collect()
    }

    /// Coordinates reprojected into `target`, leaving the records untouched.
    ///
    /// Fails with `CrsUndefined` when the set has no CRS.
    pub fn coords_in(&self, target: &Crs) -> Result<Vec<(f64, f64)>> {
        let transformer = Transformer::new(self.crs(), Some(target))?;
        let coords = self.coords();
        Ok(transformer.transform_all(&coords)?.into_owned())
    }

    /// Bounding rectangle of all points, or `None` for an empty set.
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.records
            .iter()
            .map(|r| r.point)
            .collect::<MultiPoint<f64>>()
            .bounding_rect()
    }

    /// Value of an extracted column for one point.
    ///
    /// The outer `None` means the point or column does not exist; the inner
    /// `None` is the missing-value sentinel.
    pub fn attribute(&self, id: PointId, name: &str) -> Option<Option<f64>> {
        self.record(id)?.attributes.get(name).copied()
    }

    /// Append an extracted column, one value per point in id order.
    ///
    /// Appending a name that already exists replaces its values and keeps its
    /// original position.
    pub fn append_column(&mut self, name: &str, values: Vec<Option<f64>>) -> Result<()> {
        if values.len() != self.records.len() {
            return Err(ExtractError::ColumnLength {
                column: name.to_string(),
                expected: self.records.len(),
                actual: values.len(),
            });
        }
        if !self.attribute_names.iter().any(|n| n == name) {
            self.attribute_names.push(name.to_string());
        }
        for (record, value) in self.records.iter_mut().zip(values) {
            record.attributes.insert(name.to_string(), value);
        }
        Ok(())
    }
}
