//! Raster alignment: aggregation → exact-grid resampling → reprojection →
//! crop/mask. Brings an observed and a projected raster onto one grid so they
//! can be overlaid cell by cell.
pub mod aggregate;
pub mod crop;
pub mod warp;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crs::Crs;
use crate::error::{HarmonizeError, Result};
use crate::mask::RegionMask;
use crate::raster::CategoricalRaster;

pub use aggregate::{block_factor, change_resolution};
pub use crop::crop_and_mask;
pub use warp::{reproject, resample_to_match, resolution_in, suggested_grid, warp_to_grid};

/// Point resampling rule. Categorical codes admit nearest neighbour only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Resampling {
    #[default]
    Nearest,
}

/// Block aggregation rule for coarsening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Aggregation {
    /// Most frequent valid code in the block.
    #[default]
    Mode,
}

/// Observed and projected rasters sharing one grid.
#[derive(Debug, Clone)]
pub struct AlignedPair {
    pub observed: CategoricalRaster,
    pub projected: CategoricalRaster,
}

/// Align `observed` onto the grid of `projected`, then bring both into
/// `target_crs` and restrict them to `mask`.
///
/// Order per source:
///   1. observed is mode-aggregated towards the projected resolution
///      (measured in observed CRS units) on its native grid;
///   2. nearest-neighbour resampled onto the projected grid exactly;
///   3. both are reprojected to `target_crs` (same input grid → same output grid);
///   4. both are cropped and masked with `mask`.
pub fn align_pair(
    observed: &CategoricalRaster,
    projected: &CategoricalRaster,
    mask: &RegionMask,
    target_crs: Crs,
) -> Result<AlignedPair> {
    let observed_crs = observed.require_crs()?;
    let reference = projected.grid()?;

    let target_size = resolution_in(&reference, observed_crs)?;
    let coarse = change_resolution(observed, target_size, Aggregation::Mode)?;
    debug!(
        from = ?(observed.width(), observed.height()),
        to = ?(coarse.width(), coarse.height()),
        "observed aggregated"
    );
    let matched = resample_to_match(&coarse, projected)?;

    let projected = crop_and_mask(&reproject(projected, target_crs, Resampling::Nearest)?, mask)?;
    let observed = crop_and_mask(&reproject(&matched, target_crs, Resampling::Nearest)?, mask)?;

    let (a, b) = (observed.grid()?, projected.grid()?);
    if !a.matches(&b) {
        return Err(HarmonizeError::GridMismatch(format!("aligned grids differ: {a:?} vs {b:?}")));
    }
    Ok(AlignedPair { observed, projected })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Extent, GeoTransform};

    /// 30×30 observed cells of 0.1° and a 3×3 projected grid of 1° over the
    /// same 3°×3° box south-west of Brasília.
    fn fixtures() -> (CategoricalRaster, CategoricalRaster, RegionMask) {
        let obs_data: Vec<i32> = (0..30 * 30)
            .map(|i| {
                let (r, c) = (i / 30, i % 30);
                // Left third cropland (18), rest pasture (15); one nodata strip.
                if r == 0 { 0 } else if c < 10 { 18 } else { 15 }
            })
            .collect();
        let observed = CategoricalRaster::new(
            30, 30,
            GeoTransform::new(-50.0, -15.0, 0.1, -0.1),
            Some(Crs::WGS84),
            obs_data,
            0,
        )
        .unwrap();
        let projected = CategoricalRaster::new(
            3, 3,
            GeoTransform::new(-50.0, -15.0, 1.0, -1.0),
            Some(Crs::WGS84),
            vec![5, 2, 2, 5, 2, 2, 5, 2, 2],
            255,
        )
        .unwrap();
        let mask = RegionMask::from_extent(Extent::new(-50.0, -18.0, -47.0, -15.0), Crs::WGS84).unwrap();
        (observed, projected, mask)
    }

    #[test]
    fn aligned_pair_shares_one_grid() {
        let (o, p, m) = fixtures();
        let pair = align_pair(&o, &p, &m, Crs::WGS84).unwrap();
        assert!(pair.observed.grid().unwrap().matches(&pair.projected.grid().unwrap()));
        assert_eq!((pair.observed.width(), pair.observed.height()), (3, 3));
        // Modal aggregation ignores the nodata strip in the top row of blocks.
        assert_eq!(pair.observed.data(), &[18, 15, 15, 18, 15, 15, 18, 15, 15]);
        assert_eq!(pair.projected.data(), p.data());
    }

    #[test]
    fn alignment_is_deterministic() {
        let (o, p, m) = fixtures();
        let a = align_pair(&o, &p, &m, Crs::from_epsg(32722)).unwrap();
        let b = align_pair(&o, &p, &m, Crs::from_epsg(32722)).unwrap();
        assert_eq!(a.observed, b.observed);
        assert_eq!(a.projected, b.projected);
        assert!(a.observed.grid().unwrap().matches(&a.projected.grid().unwrap()));
    }

    #[test]
    fn undefined_crs_is_fatal() {
        let (o, p, m) = fixtures();
        let no_crs = CategoricalRaster::new(
            o.width(), o.height(), *o.transform(), None, o.data().to_vec(), o.nodata(),
        )
        .unwrap();
        assert!(matches!(align_pair(&no_crs, &p, &m, Crs::WGS84), Err(HarmonizeError::InvalidCrs(_))));
    }
}
