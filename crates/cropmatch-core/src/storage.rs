//! Raster persistence. The pipeline only sees [`RasterStore`]; GeoTIFF files
//! are the on-disk format and [`MemoryStore`] backs tests and dry runs.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tracing::debug;

use crate::crs::Crs;
use crate::error::{HarmonizeError, Result};
use crate::raster::{CategoricalRaster, GeoTransform};

/// Load/save collaborator for categorical rasters.
pub trait RasterStore: Send + Sync {
    fn load(&self, path: &Path) -> Result<CategoricalRaster>;
    fn save(&self, raster: &CategoricalRaster, path: &Path) -> Result<()>;

    /// Load, taking `fallback_nodata` as the marker when the stored raster
    /// records none. Stores that always keep a marker ignore the fallback.
    fn load_with_fallback(&self, path: &Path, fallback_nodata: i32) -> Result<CategoricalRaster> {
        let _ = fallback_nodata;
        self.load(path)
    }
}

// ── GeoTIFF ──────────────────────────────────────────────────────────────────

// GeoKey ids (GeoTIFF 1.0, section 6.2).
const GT_MODEL_TYPE: u32 = 1024;
const GT_RASTER_TYPE: u32 = 1025;
const GEOGRAPHIC_TYPE: u32 = 2048;
const PROJECTED_CS_TYPE: u32 = 3072;
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const RASTER_PIXEL_IS_POINT: u16 = 2;
/// GeoKey value meaning "user defined".
const USER_DEFINED: u32 = 32767;

/// Single-band integer GeoTIFF files.
#[derive(Debug, Clone, Copy)]
pub struct GeoTiffStore {
    /// Nodata marker assumed when a file carries no GDAL nodata tag.
    pub default_nodata: i32,
}

impl Default for GeoTiffStore {
    fn default() -> Self {
        Self { default_nodata: 0 }
    }
}

impl GeoTiffStore {
    pub fn new(default_nodata: i32) -> Self {
        Self { default_nodata }
    }
}

impl RasterStore for GeoTiffStore {
    fn load(&self, path: &Path) -> Result<CategoricalRaster> {
        self.load_with_fallback(path, self.default_nodata)
    }

    fn save(&self, raster: &CategoricalRaster, path: &Path) -> Result<()> {
        write_geotiff(raster, path, RASTER_PIXEL_IS_AREA, true)
    }

    fn load_with_fallback(&self, path: &Path, fallback_nodata: i32) -> Result<CategoricalRaster> {
        let file = File::open(path)?;
        let mut decoder = Decoder::new(BufReader::new(file))?.with_limits(Limits::unlimited());
        let (width, height) = decoder.dimensions()?;

        let keys = read_geokeys(&mut decoder)?;
        let mut transform = read_transform(&mut decoder)
            .map_err(|e| HarmonizeError::Storage(format!("{}: {e}", path.display())))?;
        if keys.raster_type == Some(RASTER_PIXEL_IS_POINT) {
            // Tiepoints address pixel centres; move the origin to the corner.
            transform.origin_x -= transform.pixel_width / 2.0;
            transform.origin_y -= transform.pixel_height / 2.0;
        }
        let crs = keys.crs;
        let nodata = read_nodata(&mut decoder)?.unwrap_or(fallback_nodata);

        let data: Vec<i32> = match decoder.read_image()? {
            DecodingResult::U8(v) => v.into_iter().map(i32::from).collect(),
            DecodingResult::I8(v) => v.into_iter().map(i32::from).collect(),
            DecodingResult::U16(v) => v.into_iter().map(i32::from).collect(),
            DecodingResult::I16(v) => v.into_iter().map(i32::from).collect(),
            DecodingResult::I32(v) => v,
            DecodingResult::U32(v) => v
                .into_iter()
                .map(|x| {
                    i32::try_from(x)
                        .map_err(|_| HarmonizeError::Storage(format!("{}: code {x} exceeds i32", path.display())))
                })
                .collect::<Result<_>>()?,
            _ => {
                return Err(HarmonizeError::Storage(format!(
                    "{}: only integer single-band images hold categorical codes",
                    path.display()
                )))
            }
        };

        debug!(path = %path.display(), width, height, crs = ?crs, nodata, "raster loaded");
        CategoricalRaster::new(width as usize, height as usize, transform, crs, data, nodata)
    }
}

fn write_geotiff(raster: &CategoricalRaster, path: &Path, raster_type: u16, with_nodata: bool) -> Result<()> {
    let crs = raster.require_crs()?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let t = raster.transform();
    let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
    let mut image = encoder.new_image::<colortype::GrayI32>(raster.width() as u32, raster.height() as u32)?;

    let scale = [t.pixel_width, -t.pixel_height, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0];
    let (model_type, crs_key) = if crs.is_geographic() {
        (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE)
    } else {
        (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE)
    };
    let epsg = u16::try_from(crs.epsg())
        .map_err(|_| HarmonizeError::Storage(format!("{crs} does not fit a GeoKey")))?;
    let geokeys: [u16; 16] = [
        1, 1, 0, 3,
        GT_MODEL_TYPE as u16, 0, 1, model_type,
        GT_RASTER_TYPE as u16, 0, 1, raster_type,
        crs_key as u16, 0, 1, epsg,
    ];
    let nodata = raster.nodata().to_string();

    let dir = image.encoder();
    dir.write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
    dir.write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
    dir.write_tag(Tag::GeoKeyDirectoryTag, &geokeys[..])?;
    if with_nodata {
        dir.write_tag(Tag::GdalNodata, nodata.as_str())?;
    }
    image.write_data(raster.data())?;

    debug!(path = %path.display(), width = raster.width(), height = raster.height(), "raster saved");
    Ok(())
}

fn read_transform<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    if let Some(matrix) = decoder.find_tag(Tag::ModelTransformationTag)? {
        let m = matrix.into_f64_vec()?;
        if m.len() < 16 {
            return Err(HarmonizeError::Storage("short ModelTransformationTag".into()));
        }
        if m[1] != 0.0 || m[4] != 0.0 {
            return Err(HarmonizeError::Storage("rotated rasters are not supported".into()));
        }
        return Ok(GeoTransform::new(m[3], m[7], m[0], m[5]));
    }

    let scale = decoder
        .find_tag(Tag::ModelPixelScaleTag)?
        .ok_or_else(|| HarmonizeError::Storage("missing ModelPixelScaleTag".into()))?
        .into_f64_vec()?;
    let tiepoint = decoder
        .find_tag(Tag::ModelTiepointTag)?
        .ok_or_else(|| HarmonizeError::Storage("missing ModelTiepointTag".into()))?
        .into_f64_vec()?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(HarmonizeError::Storage("short georeferencing tags".into()));
    }
    let (sx, sy) = (scale[0], scale[1]);
    let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
    Ok(GeoTransform::new(x - i * sx, y + j * sy, sx, -sy))
}

#[derive(Debug, Default)]
struct GeoKeys {
    /// None when absent or user defined.
    crs: Option<Crs>,
    raster_type: Option<u16>,
}

fn read_geokeys<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Result<GeoKeys> {
    let Some(dir) = decoder.find_tag(Tag::GeoKeyDirectoryTag)? else {
        return Ok(GeoKeys::default());
    };
    let keys = dir.into_u32_vec()?;
    let mut projected = None;
    let mut geographic = None;
    let mut raster_type = None;
    for entry in keys.chunks_exact(4).skip(1) {
        let (id, location, value) = (entry[0], entry[1], entry[3]);
        // location 0: value stored inline in the directory.
        if location != 0 || value == 0 || value == USER_DEFINED {
            continue;
        }
        match id {
            GT_RASTER_TYPE => raster_type = u16::try_from(value).ok(),
            PROJECTED_CS_TYPE => projected = Some(value),
            GEOGRAPHIC_TYPE => geographic = Some(value),
            _ => {}
        }
    }
    Ok(GeoKeys { crs: projected.or(geographic).map(Crs::from_epsg), raster_type })
}

fn read_nodata<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Result<Option<i32>> {
    let Some(tag) = decoder.find_tag(Tag::GdalNodata)? else {
        return Ok(None);
    };
    let text = tag.into_string()?;
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    let value: f64 = text
        .parse()
        .map_err(|_| HarmonizeError::Storage(format!("unparseable nodata '{text}'")))?;
    if value.fract() != 0.0 || value < i32::MIN as f64 || value > i32::MAX as f64 {
        return Err(HarmonizeError::Storage(format!("nodata {value} is not an integer code")));
    }
    Ok(Some(value as i32))
}

// ── In-memory ────────────────────────────────────────────────────────────────

/// Path-keyed raster map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rasters: Mutex<HashMap<PathBuf, CategoricalRaster>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, raster: CategoricalRaster) {
        self.lock().insert(path.into(), raster);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, CategoricalRaster>> {
        // A poisoned map still holds consistent rasters; inserts are atomic.
        self.rasters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RasterStore for MemoryStore {
    fn load(&self, path: &Path) -> Result<CategoricalRaster> {
        self.lock()
            .get(path)
            .cloned()
            .ok_or_else(|| HarmonizeError::Storage(format!("no raster stored at {}", path.display())))
    }

    fn save(&self, raster: &CategoricalRaster, path: &Path) -> Result<()> {
        self.insert(path, raster.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(crs: Crs, t: GeoTransform, nodata: i32) -> CategoricalRaster {
        CategoricalRaster::new(3, 2, t, Some(crs), vec![0, 1, 10, 11, nodata, 1], nodata).unwrap()
    }

    #[test]
    fn geotiff_round_trip_geographic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("composite.tif");
        let r = sample(Crs::SIRGAS2000, GeoTransform::new(-53.25, -12.5, 0.25, -0.25), -1);

        let store = GeoTiffStore::default();
        store.save(&r, &path).unwrap();
        let back = store.load(&path).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn geotiff_round_trip_projected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/utm.tif");
        let r = sample(Crs::from_epsg(32722), GeoTransform::new(500_000.0, 8_600_000.0, 30.0, -30.0), 255);

        let store = GeoTiffStore::new(0);
        store.save(&r, &path).unwrap();
        let back = store.load(&path).unwrap();
        assert_eq!(back.crs(), Some(Crs::from_epsg(32722)));
        assert_eq!(back.transform(), r.transform());
        assert_eq!(back.nodata(), 255);
        assert_eq!(back.data(), r.data());
    }

    #[test]
    fn saving_without_crs_fails() {
        let dir = tempfile::tempdir().unwrap();
        let t = GeoTransform::new(0.0, 1.0, 1.0, -1.0);
        let r = CategoricalRaster::new(1, 1, t, None, vec![1], -1).unwrap();
        assert!(matches!(
            GeoTiffStore::default().save(&r, &dir.path().join("x.tif")),
            Err(HarmonizeError::InvalidCrs(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = GeoTiffStore::default().load(&dir.path().join("absent.tif"));
        assert!(matches!(err, Err(HarmonizeError::Io(_))));
    }

    #[test]
    fn pixel_is_point_origin_moves_to_the_corner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("point.tif");
        let r = sample(Crs::WGS84, GeoTransform::new(-50.0, -10.0, 0.5, -0.5), -1);
        write_geotiff(&r, &path, RASTER_PIXEL_IS_POINT, true).unwrap();

        let back = GeoTiffStore::default().load(&path).unwrap();
        assert_eq!(back.transform(), &GeoTransform::new(-50.25, -9.75, 0.5, -0.5));
        assert_eq!(back.data(), r.data());
    }

    #[test]
    fn untagged_file_takes_the_fallback_nodata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("untagged.tif");
        let r = sample(Crs::WGS84, GeoTransform::new(0.0, 2.0, 1.0, -1.0), 255);
        write_geotiff(&r, &path, RASTER_PIXEL_IS_AREA, false).unwrap();

        let store = GeoTiffStore::new(0);
        assert_eq!(store.load(&path).unwrap().nodata(), 0);
        let back = store.load_with_fallback(&path, -1).unwrap();
        assert_eq!(back.nodata(), -1);
        // Code 0 stays a valid cell.
        assert_eq!(back.valid_count(), 6);
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        let r = sample(Crs::WGS84, GeoTransform::new(0.0, 2.0, 1.0, -1.0), -1);
        store.save(&r, Path::new("a/b.tif")).unwrap();
        assert!(store.contains(Path::new("a/b.tif")));
        assert_eq!(store.load(Path::new("a/b.tif")).unwrap(), r);
        assert!(matches!(store.load(Path::new("other.tif")), Err(HarmonizeError::Storage(_))));
    }
}
