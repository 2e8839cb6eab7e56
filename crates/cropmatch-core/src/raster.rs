use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::error::{HarmonizeError, Result};

/// Affine pixel → world mapping without rotation terms.
/// North-up rasters carry a negative `pixel_height`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// World X of the top-left corner of pixel (0, 0).
    pub origin_x: f64,
    /// World Y of the top-left corner of pixel (0, 0).
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self { origin_x, origin_y, pixel_width, pixel_height }
    }

    /// World coordinates of the centre of pixel (row, col).
    #[inline]
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Fractional (col, row) of a world point.
    #[inline]
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        ((x - self.origin_x) / self.pixel_width, (y - self.origin_y) / self.pixel_height)
    }

    /// Transform of the sub-window starting at (row, col).
    pub fn offset(&self, row: usize, col: usize) -> Self {
        Self {
            origin_x: self.origin_x + col as f64 * self.pixel_width,
            origin_y: self.origin_y + row as f64 * self.pixel_height,
            ..*self
        }
    }

    pub fn extent(&self, width: usize, height: usize) -> Extent {
        let x1 = self.origin_x + width as f64 * self.pixel_width;
        let y1 = self.origin_y + height as f64 * self.pixel_height;
        Extent {
            min_x: self.origin_x.min(x1),
            max_x: self.origin_x.max(x1),
            min_y: self.origin_y.min(y1),
            max_y: self.origin_y.max(y1),
        }
    }

    fn is_valid(&self) -> bool {
        [self.origin_x, self.origin_y, self.pixel_width, self.pixel_height]
            .iter()
            .all(|v| v.is_finite())
            && self.pixel_width != 0.0
            && self.pixel_height != 0.0
    }
}

/// Axis-aligned bounding box in some CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Overlapping box, or None if the boxes only touch or are disjoint.
    pub fn intersection(&self, other: &Extent) -> Option<Extent> {
        let min_x = self.min_x.max(other.min_x);
        let max_x = self.max_x.min(other.max_x);
        let min_y = self.min_y.max(other.min_y);
        let max_y = self.max_y.min(other.max_y);
        (min_x < max_x && min_y < max_y).then_some(Extent { min_x, min_y, max_x, max_y })
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// `n` evenly spaced points along each edge, corners included.
    pub fn densify(&self, n: usize) -> Vec<(f64, f64)> {
        let n = n.max(2);
        let mut pts = Vec::with_capacity(4 * n);
        for i in 0..n {
            let t = i as f64 / (n - 1) as f64;
            let x = self.min_x + t * self.width();
            let y = self.min_y + t * self.height();
            pts.push((x, self.min_y));
            pts.push((x, self.max_y));
            pts.push((self.min_x, y));
            pts.push((self.max_x, y));
        }
        pts
    }
}

/// Target grid geometry: everything about a raster except its cells.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
}

impl GridSpec {
    pub fn extent(&self) -> Extent {
        self.transform.extent(self.width, self.height)
    }

    /// Pixel-identical comparison: same CRS and shape, origins within 1e-6 pixel,
    /// pixel sizes within 1e-9 relative.
    pub fn matches(&self, other: &GridSpec) -> bool {
        let a = &self.transform;
        let b = &other.transform;
        let size_eq = |p: f64, q: f64| (p - q).abs() <= 1e-9 * p.abs().max(q.abs());
        self.crs == other.crs
            && self.width == other.width
            && self.height == other.height
            && size_eq(a.pixel_width, b.pixel_width)
            && size_eq(a.pixel_height, b.pixel_height)
            && (a.origin_x - b.origin_x).abs() <= 1e-6 * a.pixel_width.abs()
            && (a.origin_y - b.origin_y).abs() <= 1e-6 * a.pixel_height.abs()
    }
}

/// A gridded 2D map of integer category codes, row-major (row 0 = north edge
/// for north-up rasters). Immutable: every transformation builds a new raster.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalRaster {
    width: usize,
    height: usize,
    transform: GeoTransform,
    crs: Option<Crs>,
    data: Vec<i32>,
    nodata: i32,
}

impl CategoricalRaster {
    /// Build a raster, checking `data.len() == width * height`.
    /// `crs` may be None for rasters loaded without a spatial reference; any
    /// geometric operation on such a raster fails with `InvalidCrs`.
    pub fn new(
        width: usize,
        height: usize,
        transform: GeoTransform,
        crs: Option<Crs>,
        data: Vec<i32>,
        nodata: i32,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(HarmonizeError::InvalidRaster(format!("empty shape {width}×{height}")));
        }
        if data.len() != width * height {
            return Err(HarmonizeError::InvalidRaster(format!(
                "{} cells for a {width}×{height} grid",
                data.len()
            )));
        }
        if !transform.is_valid() {
            return Err(HarmonizeError::InvalidRaster(format!("degenerate transform {transform:?}")));
        }
        Ok(Self { width, height, transform, crs, data, nodata })
    }

    /// Build a raster on `grid` from a per-cell function of (row, col).
    pub fn from_fn(grid: &GridSpec, nodata: i32, mut f: impl FnMut(usize, usize) -> i32) -> Result<Self> {
        let mut data = Vec::with_capacity(grid.width * grid.height);
        for r in 0..grid.height {
            for c in 0..grid.width {
                data.push(f(r, c));
            }
        }
        Self::new(grid.width, grid.height, grid.transform, Some(grid.crs), data, nodata)
    }

    /// Same geometry and nodata marker, new cells.
    pub(crate) fn with_data(&self, data: Vec<i32>) -> Self {
        debug_assert_eq!(data.len(), self.data.len());
        Self { data, ..self.clone_meta() }
    }

    fn clone_meta(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            transform: self.transform,
            crs: self.crs,
            data: Vec::new(),
            nodata: self.nodata,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    #[inline]
    pub fn crs(&self) -> Option<Crs> {
        self.crs
    }

    #[inline]
    pub fn nodata(&self) -> i32 {
        self.nodata
    }

    #[inline]
    pub fn data(&self) -> &[i32] {
        &self.data
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> i32 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn is_nodata(&self, value: i32) -> bool {
        value == self.nodata
    }

    /// CRS or `InvalidCrs` if the raster carries none.
    pub fn require_crs(&self) -> Result<Crs> {
        self.crs
            .ok_or_else(|| HarmonizeError::InvalidCrs("raster has no spatial reference".into()))
    }

    pub fn grid(&self) -> Result<GridSpec> {
        Ok(GridSpec {
            width: self.width,
            height: self.height,
            transform: self.transform,
            crs: self.require_crs()?,
        })
    }

    pub fn extent(&self) -> Extent {
        self.transform.extent(self.width, self.height)
    }

    /// Value of the cell containing world point (x, y), if inside the grid.
    pub fn sample(&self, x: f64, y: f64) -> Option<i32> {
        let (fc, fr) = self.transform.world_to_pixel(x, y);
        if !(fc >= 0.0 && fr >= 0.0) {
            return None;
        }
        let (c, r) = (fc.floor() as usize, fr.floor() as usize);
        (c < self.width && r < self.height).then(|| self.get(r, c))
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|&&v| v != self.nodata).count()
    }

    /// Distinct non-nodata codes, ascending.
    pub fn distinct_codes(&self) -> BTreeSet<i32> {
        self.data.iter().copied().filter(|&v| v != self.nodata).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// North-up raster in EPSG:4326 with a 1° grid whose top-left corner is (x0, y0).
    pub(crate) fn grid_raster(x0: f64, y0: f64, rows: &[&[i32]], nodata: i32) -> CategoricalRaster {
        let height = rows.len();
        let width = rows[0].len();
        let data: Vec<i32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        CategoricalRaster::new(
            width,
            height,
            GeoTransform::new(x0, y0, 1.0, -1.0),
            Some(Crs::WGS84),
            data,
            nodata,
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_length_mismatch() {
        let t = GeoTransform::new(0.0, 0.0, 1.0, -1.0);
        let err = CategoricalRaster::new(2, 2, t, Some(Crs::WGS84), vec![0; 3], -1);
        assert!(matches!(err, Err(HarmonizeError::InvalidRaster(_))));
    }

    #[test]
    fn new_rejects_zero_pixel_size() {
        let t = GeoTransform::new(0.0, 0.0, 0.0, -1.0);
        let err = CategoricalRaster::new(1, 1, t, Some(Crs::WGS84), vec![0], -1);
        assert!(matches!(err, Err(HarmonizeError::InvalidRaster(_))));
    }

    #[test]
    fn pixel_center_and_sample_agree() {
        let r = grid_raster(-50.0, -10.0, &[&[1, 2, 3], &[4, 5, 6]], 0);
        let (x, y) = r.transform().pixel_center(1, 2);
        assert_eq!((x, y), (-47.5, -11.5));
        assert_eq!(r.sample(x, y), Some(6));
        assert_eq!(r.sample(-50.5, -10.5), None);
        assert_eq!(r.sample(-46.9, -10.5), None);
    }

    #[test]
    fn extent_of_north_up_grid() {
        let r = grid_raster(-50.0, -10.0, &[&[1, 2, 3], &[4, 5, 6]], 0);
        assert_eq!(r.extent(), Extent::new(-50.0, -12.0, -47.0, -10.0));
    }

    #[test]
    fn missing_crs_is_invalid() {
        let t = GeoTransform::new(0.0, 0.0, 1.0, -1.0);
        let r = CategoricalRaster::new(1, 1, t, None, vec![3], -1).unwrap();
        assert!(matches!(r.grid(), Err(HarmonizeError::InvalidCrs(_))));
    }

    #[test]
    fn grid_matches_tolerates_float_noise_only() {
        let a = grid_raster(0.0, 0.0, &[&[0, 0]], -1).grid().unwrap();
        let mut b = a;
        b.transform.origin_x += 1e-9;
        assert!(a.matches(&b));
        b.transform.origin_x += 0.5;
        assert!(!a.matches(&b));
        let mut c = a;
        c.crs = Crs::SIRGAS2000;
        assert!(!a.matches(&c));
    }

    #[test]
    fn extent_intersection_requires_positive_area() {
        let a = Extent::new(0.0, 0.0, 2.0, 2.0);
        assert_eq!(a.intersection(&Extent::new(1.0, 1.0, 3.0, 3.0)), Some(Extent::new(1.0, 1.0, 2.0, 2.0)));
        assert_eq!(a.intersection(&Extent::new(2.0, 0.0, 3.0, 2.0)), None);
    }
}
