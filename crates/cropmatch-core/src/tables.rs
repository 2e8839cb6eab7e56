//! Fixed remap tables for the observed (MapBiomas Brazil) legend and the
//! projected single-class layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarmonizeError;
use crate::overlay::{OBSERVED_POSITIVE, PROJECTED_POSITIVE};
use crate::reclass::RemapTable;

/// Nodata marker of every reclassified label raster.
pub const LABEL_NODATA: i32 = -1;

/// MapBiomas "no data / not observed" codes.
pub const OBSERVED_NODATA: i32 = 0;
pub const NOT_OBSERVED: i32 = 27;

/// Marker assumed for projected files without a nodata tag. No unsigned code
/// equals it, so every stored cell stays valid.
pub const PROJECTED_NODATA: i32 = -1;

/// Every code of the observed legend, group codes included.
pub const OBSERVED_LEGEND: &[i32] = &[
    1, 3, 4, 5, 6, 49, // forest
    10, 11, 12, 32, 29, 50, 13, // non-forest natural formation
    14, 15, 18, 19, 39, 20, 40, 62, 41, 36, 46, 47, 35, 48, 9, 21, // farming
    22, 23, 24, 30, 25, // non-vegetated
    26, 33, 31, // water
    NOT_OBSERVED,
];

/// Temporary and perennial crop codes.
pub const CROPLAND_CODES: &[i32] = &[18, 19, 20, 35, 36, 39, 40, 41, 46, 47, 48, 62];
pub const MOSAIC_OF_USES: i32 = 21;
pub const PASTURE: i32 = 15;

/// Which observed classes count as cropland.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InclusionPolicy {
    Cropland,
    CroplandMosaic,
    CroplandMosaicPasture,
}

impl InclusionPolicy {
    pub const ALL: [InclusionPolicy; 3] = [
        InclusionPolicy::Cropland,
        InclusionPolicy::CroplandMosaic,
        InclusionPolicy::CroplandMosaicPasture,
    ];

    pub fn included_codes(self) -> Vec<i32> {
        let mut codes = CROPLAND_CODES.to_vec();
        if matches!(self, InclusionPolicy::CroplandMosaic | InclusionPolicy::CroplandMosaicPasture) {
            codes.push(MOSAIC_OF_USES);
        }
        if self == InclusionPolicy::CroplandMosaicPasture {
            codes.push(PASTURE);
        }
        codes
    }

    /// Exhaustive table over the legend: included codes → 1, every other legend
    /// code → 0. "Not observed" is treated as nodata-like and maps to the label
    /// nodata marker.
    pub fn remap_table(self) -> RemapTable {
        let included = self.included_codes();
        RemapTable::new(OBSERVED_LEGEND.iter().map(|&code| {
            let target = if code == NOT_OBSERVED {
                LABEL_NODATA
            } else if included.contains(&code) {
                OBSERVED_POSITIVE
            } else {
                0
            };
            (code, target)
        }))
        .with_nodata_marker(LABEL_NODATA)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InclusionPolicy::Cropland => "cropland",
            InclusionPolicy::CroplandMosaic => "cropland_mosaic",
            InclusionPolicy::CroplandMosaicPasture => "cropland_mosaic_pasture",
        }
    }
}

impl fmt::Display for InclusionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InclusionPolicy {
    type Err = HarmonizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InclusionPolicy::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| HarmonizeError::InvalidConfig(format!("unknown inclusion policy '{s}'")))
    }
}

/// Threshold table collapsing the projected layer to {0, 10}.
pub fn projected_table(cropland_code: i32) -> RemapTable {
    RemapTable::threshold(&[cropland_code], PROJECTED_POSITIVE).with_nodata_marker(LABEL_NODATA)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reclass::reclassify;
    use crate::raster::tests::grid_raster;

    #[test]
    fn policies_are_nested() {
        let a = InclusionPolicy::Cropland.included_codes();
        let b = InclusionPolicy::CroplandMosaic.included_codes();
        let c = InclusionPolicy::CroplandMosaicPasture.included_codes();
        assert!(a.iter().all(|x| b.contains(x)));
        assert!(b.iter().all(|x| c.contains(x)));
        assert!(!a.contains(&MOSAIC_OF_USES) && b.contains(&MOSAIC_OF_USES));
        assert!(!b.contains(&PASTURE) && c.contains(&PASTURE));
    }

    #[test]
    fn policy_tables_cover_the_whole_legend() {
        for policy in InclusionPolicy::ALL {
            let t = policy.remap_table();
            for &code in OBSERVED_LEGEND {
                assert!(t.lookup(code).is_some(), "{policy}: code {code} unmapped");
            }
        }
        assert!(CROPLAND_CODES.iter().all(|c| OBSERVED_LEGEND.contains(c)));
    }

    #[test]
    fn observed_raster_reclassifies_to_binary_labels() {
        // 0 is source nodata, 27 not observed.
        let r = grid_raster(0.0, 1.0, &[&[0, 39, 21, 15, 3, 27]], OBSERVED_NODATA);
        let crop = reclassify(&r, &InclusionPolicy::Cropland.remap_table()).unwrap();
        assert_eq!(crop.data(), &[-1, 1, 0, 0, 0, -1]);
        let wide = reclassify(&r, &InclusionPolicy::CroplandMosaicPasture.remap_table()).unwrap();
        assert_eq!(wide.data(), &[-1, 1, 1, 1, 0, -1]);
    }

    #[test]
    fn projected_table_marks_only_cropland() {
        let r = grid_raster(0.0, 1.0, &[&[5, 1, 2, 255]], 255);
        let out = reclassify(&r, &projected_table(5)).unwrap();
        assert_eq!(out.data(), &[10, 0, 0, -1]);
    }

    #[test]
    fn policy_names_round_trip() {
        for p in InclusionPolicy::ALL {
            assert_eq!(p.as_str().parse::<InclusionPolicy>().unwrap(), p);
        }
        assert!(matches!("everything".parse::<InclusionPolicy>(), Err(HarmonizeError::InvalidConfig(_))));
    }
}
