//! Renders composite rasters as PNG maps and prints batch summaries.
//!
//!   visualize map --composite ssp2_2050_cropland.tif --output map.png
//!   visualize table --summary out/summary.json

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cropmatch_core::overlay::COMPOSITE_NODATA;
use cropmatch_core::pipeline::{read_summary, CombinationOutcome};
use cropmatch_core::storage::{GeoTiffStore, RasterStore};
use cropmatch_core::CategoricalRaster;

#[derive(Parser, Debug)]
#[command(name = "visualize", about = "Agreement maps and result tables")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Composite GeoTIFF → RGBA PNG.
    Map {
        #[arg(short, long)]
        composite: PathBuf,
        /// Defaults to the composite path with a .png extension.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Fixed-width table of a summary.json.
    Table {
        #[arg(short, long)]
        summary: PathBuf,
    },
}

// ── Colours ──────────────────────────────────────────────────────────────────

/// Composite code → RGBA. Nodata and anything unexpected are transparent.
fn composite_color(code: i32) -> [u8; 4] {
    match code {
        0 => [217, 217, 217, 255],  // neither: light grey
        1 => [245, 140, 30, 255],   // observed only: orange
        10 => [40, 110, 200, 255],  // projected only: blue
        11 => [50, 160, 70, 255],   // both: green
        _ => [0, 0, 0, 0],
    }
}

fn render(raster: &CategoricalRaster) -> image::RgbaImage {
    let (w, h) = (raster.width(), raster.height());
    let mut img = image::RgbaImage::new(w as u32, h as u32);
    for r in 0..h {
        for c in 0..w {
            let v = raster.get(r, c);
            let px = if v == COMPOSITE_NODATA || raster.is_nodata(v) { [0, 0, 0, 0] } else { composite_color(v) };
            img.put_pixel(c as u32, r as u32, image::Rgba(px));
        }
    }
    img
}

fn map(composite: &Path, output: Option<PathBuf>) -> Result<()> {
    let raster = GeoTiffStore::new(COMPOSITE_NODATA)
        .load(composite)
        .with_context(|| format!("Failed to load {}", composite.display()))?;
    let path = output.unwrap_or_else(|| composite.with_extension("png"));
    render(&raster)
        .save(&path)
        .with_context(|| format!("Failed to save {}", path.display()))?;
    println!("Wrote {} ({}×{})", path.display(), raster.width(), raster.height());
    Ok(())
}

// ── Table ────────────────────────────────────────────────────────────────────

fn rate(v: f64) -> String {
    if v.is_nan() { "-".to_owned() } else { format!("{v:.3}") }
}

fn table(summary: &Path) -> Result<()> {
    let outcomes = read_summary(summary).with_context(|| format!("Failed to read {}", summary.display()))?;
    println!(
        "{:<12} {:>5} {:>5} {:<24} {:>10} {:>10} {:>10} {:>10} {:>6} {:>6} {:>6}",
        "scenario", "year", "obs", "policy", "TP", "FN", "FP", "TN", "sens", "spec", "acc"
    );
    for outcome in &outcomes {
        let c = outcome.combination();
        match outcome {
            CombinationOutcome::Scored(s) => {
                let m = &s.matrix;
                println!(
                    "{:<12} {:>5} {:>5} {:<24} {:>10} {:>10} {:>10} {:>10} {:>6} {:>6} {:>6}",
                    c.scenario,
                    c.year,
                    c.observed_year,
                    c.policy.as_str(),
                    m.true_positive,
                    m.false_negative,
                    m.false_positive,
                    m.true_negative,
                    rate(m.sensitivity),
                    rate(m.specificity),
                    rate(m.accuracy),
                );
            }
            CombinationOutcome::Failed { error, .. } => {
                println!(
                    "{:<12} {:>5} {:>5} {:<24} failed: {error}",
                    c.scenario,
                    c.year,
                    c.observed_year,
                    c.policy.as_str()
                );
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    match Args::parse().command {
        Command::Map { composite, output } => map(&composite, output),
        Command::Table { summary } => table(&summary),
    }
}
