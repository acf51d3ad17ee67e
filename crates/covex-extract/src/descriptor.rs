//! Raster descriptors and the YAML raster catalog.
//!
//! A descriptor says where a raster lives and how to name the column
//! extracted from it:
//!
//! ```yaml
//! rasters:
//!   tcc:
//!     location: remote
//!     data_dir: s3://example-bucket/tcc
//!     data_name: tcc_{year}
//!     footprint_fn: indexes/tcc_tiles.geojson
//!     tile_field: s3_path
//!   slope:
//!     location: local
//!     data_dir: /data/dem
//!     file_name: slope.tif
//!     data_name: slope
//! ```

use crate::footprint::DEFAULT_TILE_FIELD;
use crate::template::{YearTemplate, DEFAULT_YEAR_TOKEN};
use crate::{ExtractError, Result};
use covex_raster::{Crs, RasterRef, RemoteAccess, SourceConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Storage location class of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageLocation {
    /// Local filesystem.
    Local,
    /// Remote object storage.
    Remote,
}

impl FromStr for StorageLocation {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(StorageLocation::Local),
            "remote" | "s3" => Ok(StorageLocation::Remote),
            _ => Err(ExtractError::UnknownStorageLocation(s.to_string())),
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLocation::Local => f.write_str("local"),
            StorageLocation::Remote => f.write_str("remote"),
        }
    }
}

fn default_tile_field() -> String {
    DEFAULT_TILE_FIELD.to_string()
}

fn default_year_token() -> String {
    DEFAULT_YEAR_TOKEN.to_string()
}

fn default_band() -> u32 {
    1
}

fn default_anonymous() -> bool {
    true
}

/// Configuration for one raster (tiled or untiled).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterDescriptor {
    /// Storage location class: `local`, `remote` or `s3`.
    pub location: String,
    /// Base directory or bucket URL.
    pub data_dir: String,
    /// File name for an untiled raster, possibly with a year token.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Output column name, possibly with a year token.
    pub data_name: String,
    /// GeoJSON footprint index; present for tiled rasters.
    #[serde(default)]
    pub footprint_fn: Option<PathBuf>,
    /// Footprint property holding the tile path.
    #[serde(default = "default_tile_field")]
    pub tile_field: String,
    /// CRS of the footprint index when the file does not declare one.
    #[serde(default)]
    pub footprint_crs: Option<Crs>,
    /// Token replaced by the requested year.
    #[serde(default = "default_year_token")]
    pub year_token: String,
    /// 1-indexed band to sample.
    #[serde(default = "default_band")]
    pub band: u32,
    /// Read remote objects without credentials.
    #[serde(default = "default_anonymous")]
    pub anonymous: bool,
    /// AWS region for `s3://` paths.
    #[serde(default)]
    pub region: Option<String>,
    /// Custom S3-compatible endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl RasterDescriptor {
    /// A local, untiled raster with default settings.
    pub fn local_untiled(data_dir: impl Into<String>, file_name: impl Into<String>, data_name: impl Into<String>) -> Self {
        Self {
            location: "local".to_string(),
            data_dir: data_dir.into(),
            file_name: Some(file_name.into()),
            data_name: data_name.into(),
            footprint_fn: None,
            tile_field: default_tile_field(),
            footprint_crs: None,
            year_token: default_year_token(),
            band: default_band(),
            anonymous: default_anonymous(),
            region: None,
            endpoint: None,
        }
    }

    /// A local, tiled raster with default settings.
    pub fn local_tiled(data_dir: impl Into<String>, footprint_fn: impl Into<PathBuf>, data_name: impl Into<String>) -> Self {
        Self {
            file_name: None,
            footprint_fn: Some(footprint_fn.into()),
            ..Self::local_untiled(data_dir, "", data_name)
        }
    }

    /// Parsed storage location class.
    pub fn storage(&self) -> Result<StorageLocation> {
        self.location.parse()
    }

    /// Whether points must be resolved to tiles before sampling.
    pub fn is_tiled(&self) -> bool {
        self.footprint_fn.is_some()
    }

    /// Template for the output column name.
    pub fn data_name_template(&self) -> YearTemplate {
        YearTemplate::new(&self.data_name, &self.year_token)
    }

    /// Template for the untiled file name, if any.
    pub fn file_name_template(&self) -> Option<YearTemplate> {
        self.file_name
            .as_ref()
            .map(|name| YearTemplate::new(name, &self.year_token))
    }

    /// Template for a tile path taken from the footprint index.
    pub fn tile_template(&self, tile_ref: &str) -> YearTemplate {
        YearTemplate::new(tile_ref, &self.year_token)
    }

    /// Output column name for `year`.
    pub fn column_name(&self, year: Option<i32>) -> Result<String> {
        Ok(self.data_name_template().resolve(year)?.into_owned())
    }

    /// Where to read a tile whose (already rendered) path is `tile_path`.
    ///
    /// Absolute paths and full URLs are used as-is; anything else is joined
    /// onto `data_dir`.
    pub fn tile_raster_ref(&self, storage: StorageLocation, tile_path: &str) -> RasterRef {
        join_location(storage, &self.data_dir, tile_path)
    }

    /// Where to read the single raster of an untiled descriptor.
    pub fn untiled_raster_ref(&self, year: Option<i32>) -> Result<RasterRef> {
        let storage = self.storage()?;
        let template = self.file_name_template().ok_or_else(|| {
            ExtractError::InvalidDescriptor(format!(
                "raster '{}' has neither file_name nor footprint_fn",
                self.data_name
            ))
        })?;
        let file_name = template.resolve(year)?;
        Ok(join_location(storage, &self.data_dir, &file_name))
    }

    /// Settings for the raster source reading this descriptor's data.
    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            access: if self.anonymous {
                RemoteAccess::Anonymous
            } else {
                RemoteAccess::Credentialed
            },
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            ..SourceConfig::default()
        }
    }

    /// Check the descriptor before any per-point work.
    pub fn validate(&self, year: Option<i32>) -> Result<()> {
        self.storage()?;

        if self.band == 0 {
            return Err(ExtractError::InvalidDescriptor(format!(
                "raster '{}': bands are 1-indexed, got band 0",
                self.data_name
            )));
        }
        if self.data_name.trim().is_empty() {
            return Err(ExtractError::InvalidDescriptor(
                "data_name must not be empty".to_string(),
            ));
        }

        self.data_name_template().validate(year)?;

        if !self.is_tiled() {
            match self.file_name_template() {
                Some(template) if !template.template().is_empty() => template.validate(year)?,
                _ => {
                    return Err(ExtractError::InvalidDescriptor(format!(
                        "raster '{}' has neither file_name nor footprint_fn",
                        self.data_name
                    )))
                }
            }
        }

        Ok(())
    }
}

fn join_location(storage: StorageLocation, base: &str, path: &str) -> RasterRef {
    match storage {
        StorageLocation::Local => RasterRef::Local(Path::new(base).join(path)),
        StorageLocation::Remote => {
            if path.contains("://") || base.is_empty() {
                RasterRef::Remote(path.to_string())
            } else {
                RasterRef::Remote(format!(
                    "{}/{}",
                    base.trim_end_matches('/'),
                    path.trim_start_matches('/')
                ))
            }
        }
    }
}

/// Named raster descriptors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RasterCatalog {
    /// Descriptors by name.
    #[serde(default)]
    pub rasters: BTreeMap<String, RasterDescriptor>,
}

impl RasterCatalog {
    /// Parse a catalog from YAML, rejecting unknown storage classes.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let catalog: Self = serde_yaml::from_str(text)?;
        for descriptor in catalog.rasters.values() {
            descriptor.storage()?;
        }
        Ok(catalog)
    }

    /// Load a catalog from a YAML file.
    ///
    /// Relative footprint paths are resolved against the catalog's directory.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut catalog = Self::from_yaml_str(&std::fs::read_to_string(path)?)?;
        if let Some(dir) = path.parent() {
            for descriptor in catalog.rasters.values_mut() {
                if let Some(footprint) = &descriptor.footprint_fn {
                    if footprint.is_relative() {
                        descriptor.footprint_fn = Some(dir.join(footprint));
                    }
                }
            }
        }
        Ok(catalog)
    }

    /// Look up a descriptor by name.
    pub fn get(&self, name: &str) -> Result<&RasterDescriptor> {
        self.rasters
            .get(name)
            .ok_or_else(|| ExtractError::MissingDescriptor(name.to_string()))
    }

    /// Descriptor names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rasters.keys().map(String::as_str)
    }
}
