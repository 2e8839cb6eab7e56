//! Error taxonomy shared by every stage of the harmonization pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarmonizeError {
    /// Missing or unparseable spatial reference on a raster or mask.
    #[error("invalid CRS: {0}")]
    InvalidCrs(String),

    /// No EPSG → PROJ definition is known for this code.
    #[error("EPSG:{0} has no built-in projection definition")]
    UnsupportedProjection(u32),

    #[error("coordinate transform failed: {0}")]
    Projection(String),

    /// Region mask and raster share no spatial overlap.
    #[error("geometry mismatch: {0}")]
    GeometryMismatch(String),

    /// Two rasters handed to the overlay do not share grid geometry.
    #[error("grid mismatch: {0}")]
    GridMismatch(String),

    /// A confusion-matrix rate was requested whose denominator is zero.
    #[error("rate {rate} is undefined: {denominator} is zero")]
    DegenerateRate {
        rate: &'static str,
        denominator: &'static str,
    },

    /// Overlay input holds a code outside its binary label domain.
    #[error("unexpected code {code} in {layer} layer (expected one of {expected:?})")]
    UnexpectedCode {
        layer: &'static str,
        code: i32,
        expected: [i32; 2],
    },

    #[error("invalid raster: {0}")]
    InvalidRaster(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Run configuration is incomplete or inconsistent.
    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),

    #[error("no boundary named '{0}'")]
    BoundaryNotFound(String),

    /// Georeferencing tags absent or malformed in a stored raster.
    #[error("storage: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, HarmonizeError>;
