//! Block aggregation from a fine grid to a coarser one.

use tracing::debug;

use super::Aggregation;
use crate::error::{HarmonizeError, Result};
use crate::raster::{CategoricalRaster, GeoTransform};

/// Integer block factor along one axis: `ceil(target / source)`, never below 1.
/// Ratios within 1e-9 of an integer are treated as that integer.
pub fn block_factor(target_size: f64, source_size: f64) -> usize {
    let ratio = target_size.abs() / source_size.abs();
    let snapped = ratio.round();
    let ratio = if (ratio - snapped).abs() <= 1e-9 * ratio.max(1.0) { snapped } else { ratio };
    (ratio.ceil() as usize).max(1)
}

/// Coarsen `raster` towards `target_pixel_size` (x, y, in the raster's own CRS
/// units) by aggregating blocks of cells.
///
/// The output keeps the input origin; edge blocks that run past the input are
/// aggregated from the cells that exist. A block is nodata only when none of
/// its cells is valid.
pub fn change_resolution(
    raster: &CategoricalRaster,
    target_pixel_size: (f64, f64),
    aggregation: Aggregation,
) -> Result<CategoricalRaster> {
    raster.require_crs()?;
    let (tx, ty) = target_pixel_size;
    if !(tx.is_finite() && ty.is_finite() && tx != 0.0 && ty != 0.0) {
        return Err(HarmonizeError::InvalidRaster(format!("target pixel size ({tx}, {ty})")));
    }
    let t = raster.transform();
    // A block never needs to span more than the whole raster.
    let fx = block_factor(tx, t.pixel_width).min(raster.width().max(1));
    let fy = block_factor(ty, t.pixel_height).min(raster.height().max(1));
    if fx == 1 && fy == 1 {
        return Ok(raster.clone());
    }

    let out_w = raster.width().div_ceil(fx);
    let out_h = raster.height().div_ceil(fy);
    debug!(fx, fy, out_w, out_h, "aggregating blocks");

    let nodata = raster.nodata();
    let mut data = Vec::with_capacity(out_w * out_h);
    let mut block = Vec::with_capacity(fx * fy);
    for br in 0..out_h {
        let rows = br * fy..((br + 1) * fy).min(raster.height());
        for bc in 0..out_w {
            let cols = bc * fx..((bc + 1) * fx).min(raster.width());
            block.clear();
            for r in rows.clone() {
                for c in cols.clone() {
                    let v = raster.get(r, c);
                    if v != nodata {
                        block.push(v);
                    }
                }
            }
            let value = match aggregation {
                Aggregation::Mode => modal_value(&mut block),
            };
            data.push(value.unwrap_or(nodata));
        }
    }

    let transform = GeoTransform {
        pixel_width: t.pixel_width * fx as f64,
        pixel_height: t.pixel_height * fy as f64,
        ..*t
    };
    CategoricalRaster::new(out_w, out_h, transform, raster.crs(), data, nodata)
}

/// Most frequent value; ties go to the smallest code. None for an empty block.
fn modal_value(values: &mut [i32]) -> Option<i32> {
    values.sort_unstable();
    let mut best: Option<(i32, usize)> = None;
    let mut i = 0;
    while i < values.len() {
        let v = values[i];
        let run = values[i..].iter().take_while(|&&x| x == v).count();
        if best.map_or(true, |(_, n)| run > n) {
            best = Some((v, run));
        }
        i += run;
    }
    best.map(|(v, _)| v)
}
