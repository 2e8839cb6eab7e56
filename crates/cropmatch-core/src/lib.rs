//! Harmonizes an observed land-cover raster with a projected land-use raster
//! over one region and scores their agreement.
//!
//! Stages: [`align`] brings both rasters onto one grid, [`reclass`] reduces
//! them to binary labels, [`overlay`] combines the labels and derives a
//! confusion matrix. [`pipeline`] runs every scenario × year × policy
//! combination of a batch.
pub mod align;
pub mod boundary;
pub mod crs;
pub mod error;
pub mod mask;
pub mod overlay;
pub mod pipeline;
pub mod raster;
pub mod reclass;
pub mod storage;
pub mod tables;

pub use crs::Crs;
pub use error::{HarmonizeError, Result};
pub use mask::RegionMask;
pub use overlay::{ConfusionMatrix, Tally};
pub use raster::{CategoricalRaster, GeoTransform, GridSpec};
pub use reclass::RemapTable;
pub use tables::InclusionPolicy;
