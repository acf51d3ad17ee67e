//! Coordinate reference systems and point reprojection.
//!
//! A [`Crs`] is either an EPSG code, looked up in the `crs-definitions`
//! database, or an explicit PROJ.4 definition for codes it lacks. Projection math is done by `proj4rs`, which works in
//! radians for geographic systems; this module converts at the boundary so
//! callers only ever see degrees for lon/lat systems.

use crate::{RasterError, Result};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// WGS84 geographic, the default for GeoJSON and most point tables.
pub const WGS84: Crs = Crs::Epsg(4326);

/// A coordinate reference system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    /// EPSG code resolved through the `crs-definitions` database.
    Epsg(u16),
    /// Explicit PROJ.4 definition string (starts with `+`).
    Proj(String),
}

impl Crs {
    /// The PROJ.4 definition for this system.
    pub fn proj_string(&self) -> Result<Cow<'_, str>> {
        match self {
            Crs::Proj(def) => Ok(Cow::Borrowed(def)),
            Crs::Epsg(code) => epsg_definition(*code)
                .map(Cow::Borrowed)
                .ok_or_else(|| RasterError::UnsupportedCrs(self.to_string())),
        }
    }

    /// Whether coordinates in this system are longitude/latitude degrees.
    pub fn is_geographic(&self) -> bool {
        self.proj_string()
            .map(|def| def.contains("+proj=longlat") || def.contains("+proj=latlong"))
            .unwrap_or(false)
    }

    fn build(&self) -> Result<Proj> {
        let def = self.proj_string()?;
        Proj::from_proj_string(&def).map_err(|e| RasterError::Projection {
            from: self.to_string(),
            to: self.to_string(),
            reason: format!("invalid definition: {e}"),
        })
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Epsg(code) => write!(f, "EPSG:{code}"),
            Crs::Proj(def) => f.write_str(def),
        }
    }
}

impl FromStr for Crs {
    type Err = RasterError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.starts_with('+') {
            return Ok(Crs::Proj(s.to_string()));
        }
        let code = match s.split_once(':') {
            Some((authority, code)) if authority.eq_ignore_ascii_case("EPSG") => code,
            Some(_) => return Err(RasterError::UnsupportedCrs(s.to_string())),
            None => s,
        };
        code.trim()
            .parse::<u16>()
            .map(Crs::Epsg)
            .map_err(|_| RasterError::UnsupportedCrs(s.to_string()))
    }
}

impl TryFrom<String> for Crs {
    type Error = RasterError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}

/// PROJ.4 definition for an EPSG code from the `crs-definitions` database.
fn epsg_definition(code: u16) -> Option<&'static str> {
    crs_definitions::from_code(code).map(|def| def.proj4)
}

/// Reusable transformation between two coordinate reference systems.
///
/// Building a transformer parses both definitions once; transforming many
/// points with it is cheap. When source and target are the same system the
/// transformer is an identity and never touches coordinates.
pub struct Transformer {
    kind: TransformKind,
}

enum TransformKind {
    Identity,
    Project {
        src: Proj,
        dst: Proj,
        src_geographic: bool,
        dst_geographic: bool,
        from: String,
        to: String,
    },
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TransformKind::Identity => f.write_str("Transformer(identity)"),
            TransformKind::Project { from, to, .. } => {
                write!(f, "Transformer({from} -> {to})")
            }
        }
    }
}

impl Transformer {
    /// Create a transformer from `from` to `to`.
    ///
    /// Either side being `None` is a [`RasterError::CrsUndefined`] error:
    /// silently assuming a system would produce spatially wrong samples.
    pub fn new(from: Option<&Crs>, to: Option<&Crs>) -> Result<Self> {
        let from = from.ok_or_else(|| RasterError::CrsUndefined {
            context: "source coordinates".to_string(),
        })?;
        let to = to.ok_or_else(|| RasterError::CrsUndefined {
            context: "target raster or index".to_string(),
        })?;

        if from == to {
            return Ok(Self {
                kind: TransformKind::Identity,
            });
        }

        Ok(Self {
            kind: TransformKind::Project {
                src: from.build()?,
                dst: to.build()?,
                src_geographic: from.is_geographic(),
                dst_geographic: to.is_geographic(),
                from: from.to_string(),
                to: to.to_string(),
            },
        })
    }

    /// Whether this transformer leaves coordinates untouched.
    pub fn is_identity(&self) -> bool {
        matches!(self.kind, TransformKind::Identity)
    }

    /// Transform a single coordinate.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let TransformKind::Project {
            src,
            dst,
            src_geographic,
            dst_geographic,
            from,
            to,
        } = &self.kind
        else {
            return Ok((x, y));
        };

        let mut point = if *src_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        transform(src, dst, &mut point).map_err(|e| RasterError::Projection {
            from: from.clone(),
            to: to.clone(),
            reason: format!("({x}, {y}): {e}"),
        })?;

        let (out_x, out_y) = if *dst_geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };

        if !out_x.is_finite() || !out_y.is_finite() {
            return Err(RasterError::Projection {
                from: from.clone(),
                to: to.clone(),
                reason: format!("({x}, {y}) has no finite image"),
            });
        }

        Ok((out_x, out_y))
    }

    /// Transform a batch of coordinates, preserving order and count.
    ///
    /// Identity transformers hand back the input slice itself.
    pub fn transform_all<'a>(&self, coords: &'a [(f64, f64)]) -> Result<Cow<'a, [(f64, f64)]>> {
        if self.is_identity() {
            return Ok(Cow::Borrowed(coords));
        }
        coords
            .iter()
            .map(|&(x, y)| self.transform(x, y))
            .collect::<Result<Vec<_>>>()
            .map(Cow::Owned)
    }
}

/// Reproject a batch of coordinates from `from` to `to`.
pub fn reproject<'a>(
    coords: &'a [(f64, f64)],
    from: Option<&Crs>,
    to: Option<&Crs>,
) -> Result<Cow<'a, [(f64, f64)]>> {
    Transformer::new(from, to)?.transform_all(coords)
}
