//! Year-series orchestration.
//!
//! Resolving points against a footprint index is the expensive step, and it
//! does not depend on the year. [`YearSeries`] resolves once and then
//! extracts any number of years from the same [`ResolvedPointSet`].

use crate::descriptor::RasterDescriptor;
use crate::driver::{extract_tiled, extract_untiled};
use crate::footprint::FootprintIndex;
use crate::points::PointSet;
use crate::resolve::{resolve, ResolvedPointSet};
use crate::summary::{ExtractionColumn, ExtractionTable};
use crate::{ExtractError, Result};
use covex_raster::RasterSource;
use tracing::info;

/// Tiled extraction over several years with a single spatial join.
#[derive(Debug)]
pub struct YearSeries<'a> {
    resolved: ResolvedPointSet,
    descriptor: &'a RasterDescriptor,
    source: &'a RasterSource,
}

impl<'a> YearSeries<'a> {
    /// Load the descriptor's footprint index and resolve `points` against it.
    pub fn new(
        points: PointSet,
        descriptor: &'a RasterDescriptor,
        source: &'a RasterSource,
    ) -> Result<Self> {
        descriptor.storage()?;
        let footprint_fn = descriptor.footprint_fn.as_ref().ok_or_else(|| {
            ExtractError::InvalidDescriptor(format!(
                "raster '{}' has no footprint_fn",
                descriptor.data_name
            ))
        })?;
        let index = FootprintIndex::from_path(
            footprint_fn,
            &descriptor.tile_field,
            descriptor.footprint_crs.clone(),
        )?;
        Self::with_index(points, &index, descriptor, source)
    }

    /// Resolve `points` against an index that is already loaded.
    pub fn with_index(
        points: PointSet,
        index: &FootprintIndex,
        descriptor: &'a RasterDescriptor,
        source: &'a RasterSource,
    ) -> Result<Self> {
        let (resolved, any_unresolved) = resolve(points, index)?;
        if any_unresolved {
            info!(
                unresolved = resolved.unresolved_count(),
                "some points are outside every tile and will carry missing values"
            );
        }
        Ok(Self::from_resolved(resolved, descriptor, source))
    }

    /// Reuse a point set that has already been resolved.
    pub fn from_resolved(
        resolved: ResolvedPointSet,
        descriptor: &'a RasterDescriptor,
        source: &'a RasterSource,
    ) -> Self {
        Self {
            resolved,
            descriptor,
            source,
        }
    }

    /// The joined point set.
    pub fn resolved(&self) -> &ResolvedPointSet {
        &self.resolved
    }

    /// Extract one column for `year`.
    pub fn extract(&self, year: Option<i32>) -> Result<ExtractionColumn> {
        extract_tiled(&self.resolved, self.descriptor, self.source, year)
    }

    /// Extract one column per year onto a copy of the original points.
    ///
    /// An empty `years` slice extracts once without year substitution.
    pub fn run(&self, years: &[i32]) -> Result<ExtractionTable> {
        let years = year_list(years);
        for &year in &years {
            self.descriptor.validate(year)?;
        }

        let mut table = ExtractionTable::new(self.resolved.points().clone());
        for year in years {
            table.add_column(self.extract(year)?)?;
        }
        Ok(table)
    }

    /// Hand the joined point set back for reuse.
    pub fn into_resolved(self) -> ResolvedPointSet {
        self.resolved
    }
}

/// Extract from an untiled raster, one column per year.
pub fn run_untiled(
    points: PointSet,
    descriptor: &RasterDescriptor,
    source: &RasterSource,
    years: &[i32],
) -> Result<ExtractionTable> {
    let years = year_list(years);
    for &year in &years {
        descriptor.validate(year)?;
    }

    let mut table = ExtractionTable::new(points);
    for year in years {
        let column = extract_untiled(table.points(), descriptor, source, year)?;
        table.add_column(column)?;
    }
    Ok(table)
}

/// Extract `descriptor` at `points` for each year, tiled or not.
pub fn run(
    points: PointSet,
    descriptor: &RasterDescriptor,
    source: &RasterSource,
    years: &[i32],
) -> Result<ExtractionTable> {
    if descriptor.is_tiled() {
        YearSeries::new(points, descriptor, source)?.run(years)
    } else {
        run_untiled(points, descriptor, source, years)
    }
}

fn year_list(years: &[i32]) -> Vec<Option<i32>> {
    if years.is_empty() {
        vec![None]
    } else {
        years.iter().copied().map(Some).collect()
    }
}
