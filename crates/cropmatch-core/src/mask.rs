//! Region-of-interest polygons used to crop and mask rasters.
//!
//! A mask is a validated `geo::MultiPolygon` tagged with its CRS. Rings are
//! closed (geo appends the first vertex when needed), so every ring edge is a
//! `Line` from `LineString::lines`.

use geo::{Area, BoundingRect, Contains, Coord, LineString, MapCoords, MultiPolygon, Point, Polygon, Validation};

use crate::crs::{CoordTransformer, Crs};
use crate::error::{HarmonizeError, Result};
use crate::raster::Extent;

/// Validated analysis boundary in a known CRS. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionMask {
    geometry: MultiPolygon<f64>,
    crs: Crs,
    bounds: Extent,
}

impl RegionMask {
    /// Normalise and validate the geometry: non-empty, finite, every polygon
    /// with non-zero area and passing geo's validity rules (closed simple
    /// rings, holes inside their shell).
    pub fn new(geometry: MultiPolygon<f64>, crs: Crs) -> Result<Self> {
        if geometry.0.is_empty() {
            return Err(HarmonizeError::InvalidGeometry("region mask has no polygons".into()));
        }
        let mut polygons = Vec::with_capacity(geometry.0.len());
        for (pi, poly) in geometry.into_iter().enumerate() {
            let (exterior, interiors) = poly.into_inner();
            let exterior = dedup_ring(exterior)
                .map_err(|e| HarmonizeError::InvalidGeometry(format!("polygon {pi} exterior: {e}")))?;
            let mut holes = Vec::with_capacity(interiors.len());
            for (hi, hole) in interiors.into_iter().enumerate() {
                holes.push(
                    dedup_ring(hole)
                        .map_err(|e| HarmonizeError::InvalidGeometry(format!("polygon {pi} hole {hi}: {e}")))?,
                );
            }
            let poly = Polygon::new(exterior, holes);
            if !poly.is_valid() {
                return Err(HarmonizeError::InvalidGeometry(format!(
                    "polygon {pi} is not valid (self-intersecting ring or misplaced hole)"
                )));
            }
            if poly.unsigned_area() < f64::EPSILON {
                return Err(HarmonizeError::InvalidGeometry(format!("polygon {pi} has zero area")));
            }
            polygons.push(poly);
        }
        Self::from_valid(MultiPolygon::new(polygons), crs)
    }

    /// Axis-aligned rectangle mask.
    pub fn from_extent(extent: Extent, crs: Crs) -> Result<Self> {
        let ring = LineString::from(vec![
            (extent.min_x, extent.min_y),
            (extent.max_x, extent.min_y),
            (extent.max_x, extent.max_y),
            (extent.min_x, extent.max_y),
        ]);
        Self::new(MultiPolygon::new(vec![Polygon::new(ring, Vec::new())]), crs)
    }

    fn from_valid(geometry: MultiPolygon<f64>, crs: Crs) -> Result<Self> {
        let rect = geometry
            .bounding_rect()
            .ok_or_else(|| HarmonizeError::InvalidGeometry("region mask has no vertices".into()))?;
        let bounds = Extent::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y);
        Ok(Self { geometry, crs, bounds })
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub fn bounds(&self) -> Extent {
        self.bounds
    }

    /// Copy of this mask with every vertex transformed into `target`.
    pub fn reproject(&self, target: Crs) -> Result<RegionMask> {
        if target == self.crs {
            return Ok(self.clone());
        }
        let t = CoordTransformer::new(self.crs, target)?;
        let geometry = self
            .geometry
            .try_map_coords(|c: Coord<f64>| t.transform(c.x, c.y).map(|(x, y)| Coord { x, y }))?;
        Self::from_valid(geometry, target)
    }

    /// Sorted half-open x-intervals `[x0, x1)` inside the mask along the
    /// horizontal line at `y`, from even-odd crossings of every ring edge.
    pub fn row_spans(&self, y: f64) -> Vec<(f64, f64)> {
        let mut xs = Vec::new();
        let rings = self
            .geometry
            .iter()
            .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()));
        for line in rings.flat_map(LineString::lines) {
            let (a, b) = (line.start, line.end);
            if (a.y <= y) != (b.y <= y) {
                xs.push(a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y));
            }
        }
        xs.sort_by(f64::total_cmp);
        xs.chunks_exact(2).map(|p| (p[0], p[1])).collect()
    }

    /// Whether the point lies in the interior of the mask. Points on a ring
    /// boundary are outside.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let b = &self.bounds;
        if x < b.min_x || x > b.max_x || y < b.min_y || y > b.max_y {
            return false;
        }
        self.geometry.contains(&Point::new(x, y))
    }
}

/// Drop repeated consecutive vertices and require three distinct finite ones.
fn dedup_ring(ring: LineString<f64>) -> std::result::Result<LineString<f64>, String> {
    let mut out: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len());
    for c in ring {
        if !c.x.is_finite() || !c.y.is_finite() {
            return Err(format!("non-finite vertex ({}, {})", c.x, c.y));
        }
        if out.last() != Some(&c) {
            out.push(c);
        }
    }
    while out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    if out.len() < 3 {
        return Err(format!("{} distinct vertices, need at least 3", out.len()));
    }
    Ok(LineString::new(out))
}
