//! Per-column accounting of extraction outcomes.

use crate::driver::PointOutcome;
use crate::points::PointSet;
use crate::Result;
use serde::Serialize;
use std::fmt;

/// How the points of one extracted column fared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionSummary {
    /// Points in the column.
    pub total: usize,
    /// Points with a sampled value.
    pub sampled: usize,
    /// Points inside an assigned raster that hit no-data or fell off its extent.
    pub no_data: usize,
    /// Points with no covering tile.
    pub uncovered: usize,
    /// Points whose tile could not be read or whose coordinates did not project.
    pub failed: usize,
}

impl ExtractionSummary {
    /// Count a single outcome.
    pub fn record(&mut self, outcome: &PointOutcome) {
        self.total += 1;
        match outcome {
            PointOutcome::Sampled(_) => self.sampled += 1,
            PointOutcome::NoData => self.no_data += 1,
            PointOutcome::Uncovered => self.uncovered += 1,
            PointOutcome::Failed(_) => self.failed += 1,
        }
    }

    /// Points carrying the missing-value sentinel.
    pub fn missing(&self) -> usize {
        self.total - self.sampled
    }
}

impl<'a> FromIterator<&'a PointOutcome> for ExtractionSummary {
    fn from_iter<I: IntoIterator<Item = &'a PointOutcome>>(iter: I) -> Self {
        let mut summary = Self::default();
        for outcome in iter {
            summary.record(outcome);
        }
        summary
    }
}

impl fmt::Display for ExtractionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} NaN out of {} (no data: {}, uncovered: {}, failed: {})",
            self.missing(),
            self.total,
            self.no_data,
            self.uncovered,
            self.failed
        )
    }
}

/// One extracted column, aligned with the point set it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionColumn {
    /// Column name (year already substituted).
    pub name: String,
    /// One value per point in id order; `None` is the missing-value sentinel.
    pub values: Vec<Option<f64>>,
    /// Outcome counts.
    pub summary: ExtractionSummary,
}

impl ExtractionColumn {
    /// Build a column from outcomes already sorted by point id.
    pub fn from_outcomes(name: String, outcomes: &[PointOutcome]) -> Self {
        Self {
            name,
            values: outcomes.iter().map(PointOutcome::value).collect(),
            summary: outcomes.iter().collect(),
        }
    }
}

/// Result table: the original points plus extracted columns.
#[derive(Debug, Clone)]
pub struct ExtractionTable {
    points: PointSet,
    summaries: Vec<(String, ExtractionSummary)>,
}

impl ExtractionTable {
    /// Start a table from a point set.
    pub fn new(points: PointSet) -> Self {
        Self {
            points,
            summaries: Vec::new(),
        }
    }

    /// Append a column to every point.
    pub fn add_column(&mut self, column: ExtractionColumn) -> Result<()> {
        self.points.append_column(&column.name, column.values)?;
        self.summaries.retain(|(name, _)| *name != column.name);
        self.summaries.push((column.name, column.summary));
        Ok(())
    }

    /// Points with their extracted attributes.
    pub fn points(&self) -> &PointSet {
        &self.points
    }

    /// Summary per column, in the order columns were added.
    pub fn summaries(&self) -> &[(String, ExtractionSummary)] {
        &self.summaries
    }

    /// Hand back the points.
    pub fn into_points(self) -> PointSet {
        self.points
    }
}
