//! Coordinate reference systems and point transforms between them.
//! All coordinate math uses f64.

use std::fmt;
use std::str::FromStr;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::{Deserialize, Serialize};

use crate::error::{HarmonizeError, Result};

/// A coordinate reference system identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs {
    epsg: u32,
}

impl Crs {
    /// WGS 84 geographic (lon/lat degrees).
    pub const WGS84: Crs = Crs { epsg: 4326 };
    /// SIRGAS 2000 geographic, the Brazilian geodetic reference.
    pub const SIRGAS2000: Crs = Crs { epsg: 4674 };

    pub const fn from_epsg(epsg: u32) -> Self {
        Self { epsg }
    }

    #[inline]
    pub fn epsg(self) -> u32 {
        self.epsg
    }

    /// True if coordinates are longitude/latitude in degrees.
    pub fn is_geographic(self) -> bool {
        matches!(self.epsg, 4326 | 4674)
    }

    /// PROJ definition string for this CRS.
    pub fn proj_string(self) -> Result<String> {
        let def = match self.epsg {
            4326 => "+proj=longlat +datum=WGS84 +no_defs".to_string(),
            4674 => "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs".to_string(),
            3857 => "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs"
                .to_string(),
            5641 => "+proj=merc +lon_0=-43 +lat_ts=-2 +x_0=5000000 +y_0=10000000 +ellps=GRS80 +units=m +no_defs"
                .to_string(),
            // SIRGAS 2000 / UTM zones 18S–25S.
            31978..=31985 => format!(
                "+proj=utm +zone={} +south +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
                self.epsg - 31960
            ),
            // WGS 84 / UTM zones 18S–25S.
            32718..=32725 => format!(
                "+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs",
                self.epsg - 32700
            ),
            other => return Err(HarmonizeError::UnsupportedProjection(other)),
        };
        Ok(def)
    }
}

impl FromStr for Crs {
    type Err = HarmonizeError;

    /// Accepts `EPSG:nnnn` (any case) or a bare code.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(HarmonizeError::InvalidCrs("empty CRS identifier".into()));
        }
        let code = match trimmed.split_once(':') {
            Some((auth, code)) if auth.eq_ignore_ascii_case("epsg") => code.trim(),
            Some((auth, _)) => {
                return Err(HarmonizeError::InvalidCrs(format!("unknown authority '{auth}'")))
            }
            None => trimmed,
        };
        let epsg: u32 = code
            .parse()
            .map_err(|_| HarmonizeError::InvalidCrs(format!("cannot parse '{s}'")))?;
        if epsg == 0 {
            return Err(HarmonizeError::InvalidCrs("EPSG code 0".into()));
        }
        Ok(Self { epsg })
    }
}

impl TryFrom<String> for Crs {
    type Error = HarmonizeError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

// ── Point transforms ─────────────────────────────────────────────────────────

enum Strategy {
    Identity,
    Proj { source: Box<Proj>, target: Box<Proj> },
}

/// Reusable point transformer between two CRSs (pure-Rust proj4rs).
pub struct CoordTransformer {
    source_crs: Crs,
    target_crs: Crs,
    strategy: Strategy,
}

impl fmt::Debug for CoordTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordTransformer")
            .field("source_crs", &self.source_crs)
            .field("target_crs", &self.target_crs)
            .field("identity", &self.is_identity())
            .finish()
    }
}

impl CoordTransformer {
    pub fn new(source_crs: Crs, target_crs: Crs) -> Result<Self> {
        let strategy = if source_crs == target_crs {
            Strategy::Identity
        } else {
            let parse = |crs: Crs| -> Result<Box<Proj>> {
                let def = crs.proj_string()?;
                Proj::from_proj_string(&def)
                    .map(Box::new)
                    .map_err(|e| HarmonizeError::Projection(format!("{crs}: {e:?}")))
            };
            Strategy::Proj {
                source: parse(source_crs)?,
                target: parse(target_crs)?,
            }
        };
        Ok(Self { source_crs, target_crs, strategy })
    }

    #[inline]
    pub fn is_identity(&self) -> bool {
        matches!(self.strategy, Strategy::Identity)
    }

    pub fn target_crs(&self) -> Crs {
        self.target_crs
    }

    /// Transform one point. Geographic CRSs take and return degrees.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let Strategy::Proj { source, target } = &self.strategy else {
            return Ok((x, y));
        };
        let mut point = if self.source_crs.is_geographic() {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        transform(source, target, &mut point)
            .map_err(|e| HarmonizeError::Projection(format!("({x}, {y}): {e:?}")))?;
        let (ox, oy) = if self.target_crs.is_geographic() {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };
        if !ox.is_finite() || !oy.is_finite() {
            return Err(HarmonizeError::Projection(format!(
                "({x}, {y}) has no finite image in {}",
                self.target_crs
            )));
        }
        Ok((ox, oy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_prefixed_and_bare_codes() {
        assert_eq!("EPSG:4326".parse::<Crs>().unwrap(), Crs::WGS84);
        assert_eq!("epsg:4674".parse::<Crs>().unwrap(), Crs::SIRGAS2000);
        assert_eq!(" 31983 ".parse::<Crs>().unwrap().epsg(), 31983);
    }

    #[test]
    fn parse_rejects_empty_and_garbage() {
        assert!(matches!("".parse::<Crs>(), Err(HarmonizeError::InvalidCrs(_))));
        assert!(matches!("EPSG:abc".parse::<Crs>(), Err(HarmonizeError::InvalidCrs(_))));
        assert!(matches!("ESRI:102033".parse::<Crs>(), Err(HarmonizeError::InvalidCrs(_))));
    }

    #[test]
    fn unknown_code_has_no_projection() {
        let crs = Crs::from_epsg(27700);
        assert!(matches!(crs.proj_string(), Err(HarmonizeError::UnsupportedProjection(27700))));
    }

    #[test]
    fn identity_transform_returns_input() {
        let t = CoordTransformer::new(Crs::WGS84, Crs::WGS84).unwrap();
        assert!(t.is_identity());
        assert_eq!(t.transform(-47.9, -15.8).unwrap(), (-47.9, -15.8));
    }

    #[test]
    fn utm_round_trip_within_centimetres() {
        // Brasília lies in UTM zone 23S.
        let fwd = CoordTransformer::new(Crs::WGS84, Crs::from_epsg(32723)).unwrap();
        let inv = CoordTransformer::new(Crs::from_epsg(32723), Crs::WGS84).unwrap();
        let (e, n) = fwd.transform(-47.9, -15.8).unwrap();
        assert!(e > 100_000.0 && e < 900_000.0, "easting={e}");
        assert!(n > 7_000_000.0 && n < 10_000_000.0, "northing={n}");
        let (lon, lat) = inv.transform(e, n).unwrap();
        assert!((lon + 47.9).abs() < 1e-6 && (lat + 15.8).abs() < 1e-6);
    }

    #[test]
    fn serde_uses_epsg_string() {
        let json = serde_json::to_string(&Crs::WGS84).unwrap();
        assert_eq!(json, "\"EPSG:4326\"");
        let back: Crs = serde_json::from_str("\"EPSG:5641\"").unwrap();
        assert_eq!(back.epsg(), 5641);
    }
}
