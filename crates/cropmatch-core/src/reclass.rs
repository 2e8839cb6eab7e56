//! Value remapping of categorical rasters.
//!
//! A [`RemapTable`] is the single point of semantic policy: swapping which
//! source codes map to 1 produces an alternative label scheme from the same
//! aligned raster.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{HarmonizeError, Result};
use crate::raster::CategoricalRaster;

/// What happens to a valid cell whose code has no table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedPolicy {
    /// Keep the original code (general multi-entry tables).
    #[default]
    Keep,
    /// Map to 0 (threshold tables reducing a raster to one class of interest).
    Zero,
}

/// Ordered `source → target` pairs. Later entries for the same source code
/// override earlier ones. Built once and shared by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemapTable {
    entries: Vec<(i32, i32)>,
    lookup: BTreeMap<i32, i32>,
    unmapped: UnmappedPolicy,
    nodata_marker: Option<i32>,
}

impl RemapTable {
    /// General table; unmapped codes are kept.
    pub fn new(pairs: impl IntoIterator<Item = (i32, i32)>) -> Self {
        let entries: Vec<(i32, i32)> = pairs.into_iter().collect();
        let lookup = entries.iter().copied().collect();
        Self { entries, lookup, unmapped: UnmappedPolicy::Keep, nodata_marker: None }
    }

    /// Threshold table: every code in `targets` becomes `marker`, anything else 0.
    pub fn threshold(targets: &[i32], marker: i32) -> Self {
        Self {
            unmapped: UnmappedPolicy::Zero,
            ..Self::new(targets.iter().map(|&t| (t, marker)))
        }
    }

    /// Each code maps to itself.
    pub fn identity(codes: impl IntoIterator<Item = i32>) -> Self {
        Self::new(codes.into_iter().map(|c| (c, c)))
    }

    /// Nodata marker written to the output instead of the input's own marker.
    /// Needed when the input nodata value coincides with a target label.
    pub fn with_nodata_marker(mut self, marker: i32) -> Self {
        self.nodata_marker = Some(marker);
        self
    }

    pub fn entries(&self) -> &[(i32, i32)] {
        &self.entries
    }

    pub fn unmapped_policy(&self) -> UnmappedPolicy {
        self.unmapped
    }

    pub fn nodata_marker(&self) -> Option<i32> {
        self.nodata_marker
    }

    #[inline]
    pub fn lookup(&self, code: i32) -> Option<i32> {
        self.lookup.get(&code).copied()
    }

    /// Mapped value of a valid (non-nodata) code.
    #[inline]
    pub fn apply(&self, code: i32) -> i32 {
        match (self.lookup(code), self.unmapped) {
            (Some(target), _) => target,
            (None, UnmappedPolicy::Keep) => code,
            (None, UnmappedPolicy::Zero) => 0,
        }
    }

    /// Every value a mapped cell can take.
    pub fn target_codes(&self) -> BTreeSet<i32> {
        let mut targets: BTreeSet<i32> = self.lookup.values().copied().collect();
        if self.unmapped == UnmappedPolicy::Zero {
            targets.insert(0);
        }
        targets
    }

    /// Valid codes present in `raster` that have no entry in this table.
    pub fn unmapped_codes(&self, raster: &CategoricalRaster) -> BTreeSet<i32> {
        raster
            .distinct_codes()
            .into_iter()
            .filter(|c| !self.lookup.contains_key(c))
            .collect()
    }
}

/// Replace every cell's code by its mapped target. Nodata stays nodata.
///
/// Without an explicit nodata marker the input marker is reused, and it must
/// not equal a code the table can emit or masked cells would become
/// indistinguishable from labelled ones. With an explicit marker, entries
/// mapping to it turn those cells into nodata.
pub fn reclassify(raster: &CategoricalRaster, table: &RemapTable) -> Result<CategoricalRaster> {
    let nodata_in = raster.nodata();
    let nodata_out = table.nodata_marker().unwrap_or(nodata_in);
    if table.nodata_marker().is_none() && table.target_codes().contains(&nodata_in) {
        return Err(HarmonizeError::InvalidRaster(format!(
            "nodata marker {nodata_in} collides with a remap target; set a distinct marker"
        )));
    }

    let unmapped = table.unmapped_codes(raster);
    if !unmapped.is_empty() {
        match table.unmapped_policy() {
            UnmappedPolicy::Keep => {
                warn!(?unmapped, "codes without a remap entry kept unchanged")
            }
            UnmappedPolicy::Zero => {
                tracing::debug!(count = unmapped.len(), "codes without a remap entry set to 0")
            }
        }
    }

    let data: Vec<i32> = raster
        .data()
        .iter()
        .map(|&v| if v == nodata_in { nodata_out } else { table.apply(v) })
        .collect();

    CategoricalRaster::new(
        raster.width(),
        raster.height(),
        *raster.transform(),
        raster.crs(),
        data,
        nodata_out,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::tests::grid_raster;

    #[test]
    fn later_duplicate_overrides_earlier() {
        let t = RemapTable::new([(3, 1), (4, 0), (3, 7)]);
        assert_eq!(t.lookup(3), Some(7));
        assert_eq!(t.entries().len(), 3);
    }

    #[test]
    fn general_table_keeps_unmapped_codes() {
        let r = grid_raster(0.0, 0.0, &[&[15, 18, 99], &[-1, 21, 18]], -1);
        let t = RemapTable::new([(15, 0), (18, 1), (21, 1)]);
        let out = reclassify(&r, &t).unwrap();
        assert_eq!(out.data(), &[0, 1, 99, -1, 1, 1]);
        assert_eq!(t.unmapped_codes(&r).into_iter().collect::<Vec<_>>(), vec![99]);
    }

    #[test]
    fn threshold_table_zeroes_everything_else() {
        let r = grid_raster(0.0, 0.0, &[&[5, 2, 255], &[5, 7, 1]], 255);
        let t = RemapTable::threshold(&[5], 10);
        let out = reclassify(&r, &t).unwrap();
        assert_eq!(out.data(), &[10, 0, 255, 10, 0, 0]);
        assert_eq!(out.nodata(), 255);
    }

    #[test]
    fn colliding_nodata_requires_marker() {
        // Source nodata 0 would merge with the "not cropland" label.
        let r = grid_raster(0.0, 0.0, &[&[0, 18, 3]], 0);
        let t = RemapTable::new([(18, 1), (3, 0)]);
        assert!(matches!(reclassify(&r, &t), Err(HarmonizeError::InvalidRaster(_))));

        let out = reclassify(&r, &t.with_nodata_marker(-1)).unwrap();
        assert_eq!(out.data(), &[-1, 1, 0]);
        assert_eq!(out.nodata(), -1);
    }

    #[test]
    fn identity_reclassification_is_idempotent() {
        let r = grid_raster(0.0, 0.0, &[&[0, 1, -1], &[1, 1, 0]], -1);
        let binary = reclassify(&r, &RemapTable::new([(0, 0), (1, 1)])).unwrap();
        let again = reclassify(&binary, &RemapTable::identity(binary.distinct_codes())).unwrap();
        assert_eq!(again, binary);
    }

    #[test]
    fn input_raster_is_left_untouched() {
        let r = grid_raster(0.0, 0.0, &[&[18, 3]], -1);
        let before = r.clone();
        let _ = reclassify(&r, &RemapTable::threshold(&[18], 1)).unwrap();
        assert_eq!(r, before);
    }
}
