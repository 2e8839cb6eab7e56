//! Nearest-neighbour warping onto a target grid.
//!
//! Every output cell takes the value of the source cell containing its centre
//! (after transforming the centre into the source CRS), or nodata when that
//! point falls outside the source. Codes are copied, never blended.

use tracing::debug;

use super::Resampling;
use crate::crs::{CoordTransformer, Crs};
use crate::error::{HarmonizeError, Result};
use crate::raster::{CategoricalRaster, Extent, GeoTransform, GridSpec};

/// Points sampled along each edge when projecting an extent.
const EDGE_SAMPLES: usize = 21;

/// Resample `raster` onto exactly `target`.
pub fn warp_to_grid(raster: &CategoricalRaster, target: &GridSpec, resampling: Resampling) -> Result<CategoricalRaster> {
    let source_crs = raster.require_crs()?;
    let back = CoordTransformer::new(target.crs, source_crs)?;
    let nodata = raster.nodata();
    debug!(
        from = %source_crs, to = %target.crs,
        width = target.width, height = target.height,
        "warping grid"
    );
    CategoricalRaster::from_fn(target, nodata, |r, c| {
        let (x, y) = target.transform.pixel_center(r, c);
        match resampling {
            Resampling::Nearest => back
                .transform(x, y)
                .ok()
                .and_then(|(sx, sy)| raster.sample(sx, sy))
                .unwrap_or(nodata),
        }
    })
}

/// Output grid covering `raster` once expressed in `target_crs`: the source
/// extent is densified and projected, and square pixels are sized so the
/// projected diagonal holds as many pixels as the source diagonal.
pub fn suggested_grid(raster: &CategoricalRaster, target_crs: Crs) -> Result<GridSpec> {
    let source = raster.grid()?;
    if source.crs == target_crs {
        return Ok(source);
    }
    let fwd = CoordTransformer::new(source.crs, target_crs)?;
    let ext = project_extent(&fwd, &source.extent())?;

    let src_diag = ((source.width.pow(2) + source.height.pow(2)) as f64).sqrt();
    let res = (ext.width().powi(2) + ext.height().powi(2)).sqrt() / src_diag;
    if !(res.is_finite() && res > 0.0) {
        return Err(HarmonizeError::Projection(format!("degenerate projected extent {ext:?}")));
    }
    let width = ((ext.width() / res).round() as usize).max(1);
    let height = ((ext.height() / res).round() as usize).max(1);
    Ok(GridSpec {
        width,
        height,
        transform: GeoTransform::new(ext.min_x, ext.max_y, res, -res),
        crs: target_crs,
    })
}

fn project_extent(t: &CoordTransformer, ext: &Extent) -> Result<Extent> {
    let mut out = Extent::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    let mut any = false;
    for (x, y) in ext.densify(EDGE_SAMPLES) {
        if let Ok((px, py)) = t.transform(x, y) {
            out.min_x = out.min_x.min(px);
            out.min_y = out.min_y.min(py);
            out.max_x = out.max_x.max(px);
            out.max_y = out.max_y.max(py);
            any = true;
        }
    }
    if !any {
        return Err(HarmonizeError::Projection(format!(
            "extent {ext:?} has no image in {}",
            t.target_crs()
        )));
    }
    Ok(out)
}

/// Resample `raster` onto a new grid expressed in `target_crs`.
/// A raster already in `target_crs` is returned unchanged.
pub fn reproject(raster: &CategoricalRaster, target_crs: Crs, resampling: Resampling) -> Result<CategoricalRaster> {
    if raster.require_crs()? == target_crs {
        return Ok(raster.clone());
    }
    let grid = suggested_grid(raster, target_crs)?;
    warp_to_grid(raster, &grid, resampling)
}

/// Resample `raster` so its grid is exactly `reference`'s grid.
pub fn resample_to_match(raster: &CategoricalRaster, reference: &CategoricalRaster) -> Result<CategoricalRaster> {
    let grid = reference.grid()?;
    if raster.grid()?.matches(&grid) {
        // Adopt the reference transform verbatim so later steps see one grid.
        return CategoricalRaster::new(
            grid.width,
            grid.height,
            grid.transform,
            Some(grid.crs),
            raster.data().to_vec(),
            raster.nodata(),
        );
    }
    warp_to_grid(raster, &grid, Resampling::Nearest)
}

/// Pixel size of `grid` measured in `crs` units around the grid centre.
pub fn resolution_in(grid: &GridSpec, crs: Crs) -> Result<(f64, f64)> {
    let t = &grid.transform;
    if grid.crs == crs {
        return Ok((t.pixel_width.abs(), t.pixel_height.abs()));
    }
    let fwd = CoordTransformer::new(grid.crs, crs)?;
    let (cx, cy) = t.pixel_center(grid.height / 2, grid.width / 2);
    let here = fwd.transform(cx, cy)?;
    let right = fwd.transform(cx + t.pixel_width, cy)?;
    let below = fwd.transform(cx, cy + t.pixel_height)?;
    let dist = |a: (f64, f64), b: (f64, f64)| ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt();
    Ok((dist(here, right), dist(here, below)))
}
