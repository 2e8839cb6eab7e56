use tracing::debug;

use crate::error::{HarmonizeError, Result};
use crate::mask::RegionMask;
use crate::raster::CategoricalRaster;

/// Restrict `raster` to the bounding box of `mask` (reprojected into the
/// raster's CRS), then set every cell whose centre lies outside the mask
/// geometry to nodata. A mask that covers no cell centre is a
/// `GeometryMismatch`, even when its bounding box overlaps the raster.
///
/// The window is snapped outward to whole source pixels so the output grid
/// stays aligned with the input grid.
pub fn crop_and_mask(raster: &CategoricalRaster, mask: &RegionMask) -> Result<CategoricalRaster> {
    let crs = raster.require_crs()?;
    let mask = mask.reproject(crs)?;
    let extent = raster.extent();
    let window = extent.intersection(&mask.bounds()).ok_or_else(|| {
        HarmonizeError::GeometryMismatch(format!(
            "mask bounds {:?} do not overlap raster extent {:?} in {crs}",
            mask.bounds(),
            extent
        ))
    })?;

    let t = raster.transform();
    let (ca, ra) = t.world_to_pixel(window.min_x, window.min_y);
    let (cb, rb) = t.world_to_pixel(window.max_x, window.max_y);
    let col0 = ca.min(cb).floor().max(0.0) as usize;
    let col1 = (ca.max(cb).ceil() as usize).min(raster.width());
    let row0 = ra.min(rb).floor().max(0.0) as usize;
    let row1 = (ra.max(rb).ceil() as usize).min(raster.height());
    if col1 <= col0 || row1 <= row0 {
        return Err(HarmonizeError::GeometryMismatch(format!(
            "mask overlaps raster by less than one pixel in {crs}"
        )));
    }

    let (w, h) = (col1 - col0, row1 - row0);
    let sub = t.offset(row0, col0);
    let nodata = raster.nodata();
    let mut data = Vec::with_capacity(w * h);
    let mut inside_count = 0usize;
    for r in 0..h {
        let (_, y) = sub.pixel_center(r, 0);
        let spans = mask.row_spans(y);
        for c in 0..w {
            let (x, _) = sub.pixel_center(r, c);
            let inside = in_spans(&spans, x);
            inside_count += usize::from(inside);
            data.push(if inside { raster.get(row0 + r, col0 + c) } else { nodata });
        }
    }
    if inside_count == 0 {
        return Err(HarmonizeError::GeometryMismatch(format!(
            "mask covers no cell centre of the raster in {crs}"
        )));
    }
    debug!(w, h, col0, row0, inside_count, "cropped and masked");
    CategoricalRaster::new(w, h, sub, Some(crs), data, nodata)
}

/// `spans` sorted by start and non-overlapping.
#[inline]
fn in_spans(spans: &[(f64, f64)], x: f64) -> bool {
    let idx = spans.partition_point(|&(x0, _)| x0 <= x);
    idx > 0 && x < spans[idx - 1].1
}
