//! Agreement scoring between observed cropland (MapBiomas) and projected
//! land-use rasters.
//!
//!   agreement batch --config run.json [--scenario ssp2] [--year 2050]
//!   agreement score --observed obs.tif --projected proj.tif --cropland-code 5

mod logging;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use cropmatch_core::align::align_pair;
use cropmatch_core::boundary::{BoundaryProvider, GeoJsonBoundaries};
use cropmatch_core::pipeline::{evaluate, write_summary, write_summary_csv, Pipeline, RunConfig};
use cropmatch_core::overlay::COMPOSITE_NODATA;
use cropmatch_core::storage::{GeoTiffStore, RasterStore};
use cropmatch_core::tables::{OBSERVED_NODATA, PROJECTED_NODATA};
use cropmatch_core::{Crs, InclusionPolicy, RegionMask};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "agreement", about = "Score spatial agreement of observed and projected cropland")]
struct Args {
    /// Default log level when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Worker threads for batch jobs (0 = one per core).
    #[arg(long, global = true, default_value = "0")]
    threads: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every scenario × year × policy combination of a run file.
    Batch {
        /// JSON run file.
        #[arg(short, long)]
        config: PathBuf,

        /// Only this scenario.
        #[arg(long)]
        scenario: Option<String>,

        /// Only this projected year.
        #[arg(long)]
        year: Option<u16>,

        /// Override the run file's output directory.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write composite rasters regardless of the run file.
        #[arg(long)]
        composites: bool,
    },
    /// Align and score one observed/projected pair.
    Score {
        #[arg(long)]
        observed: PathBuf,

        #[arg(long)]
        projected: PathBuf,

        #[arg(long, default_value = "cropland")]
        policy: InclusionPolicy,

        /// Code of the cropland class in the projected raster.
        #[arg(long)]
        cropland_code: i32,

        /// Nodata marker for a projected file without a nodata tag.
        #[arg(long, default_value_t = PROJECTED_NODATA, allow_hyphen_values = true)]
        projected_nodata: i32,

        #[arg(long, default_value = "EPSG:4326")]
        target_crs: Crs,

        /// GeoJSON boundaries; without one the projected raster's extent is used.
        #[arg(long, requires = "country")]
        boundaries: Option<PathBuf>,

        #[arg(long)]
        country: Option<String>,

        /// Write the composite raster here.
        #[arg(long)]
        composite: Option<PathBuf>,
    },
}

// ── Subcommands ──────────────────────────────────────────────────────────────

fn batch(
    config: PathBuf,
    scenario: Option<String>,
    year: Option<u16>,
    output: Option<PathBuf>,
    composites: bool,
) -> Result<()> {
    let mut run = RunConfig::from_path(&config)
        .with_context(|| format!("Failed to load run file {}", config.display()))?;
    run.retain(scenario.as_deref(), year);
    if run.jobs().is_empty() {
        bail!("No scenario/year left after filtering");
    }
    if let Some(dir) = output {
        run.output_dir = dir;
    }
    run.write_composites |= composites;

    let boundaries = GeoJsonBoundaries::from_path(&run.boundaries)
        .with_context(|| format!("Failed to read boundaries {}", run.boundaries.display()))?;
    let summary_path = run.output_dir.join("summary.json");
    let csv_path = run.output_dir.join("summary.csv");

    let pipeline = Pipeline::new(run, GeoTiffStore::new(OBSERVED_NODATA), boundaries);
    let outcomes = pipeline.run_batch()?;

    write_summary(&outcomes, &summary_path)
        .with_context(|| format!("Failed to write {}", summary_path.display()))?;
    let csv_file = std::fs::File::create(&csv_path)
        .with_context(|| format!("Failed to create {}", csv_path.display()))?;
    write_summary_csv(&outcomes, csv_file)
        .with_context(|| format!("Failed to write {}", csv_path.display()))?;

    let failed = outcomes.iter().filter(|o| !o.is_scored()).count();
    info!(summary = %summary_path.display(), combinations = outcomes.len(), failed, "batch written");
    if failed == outcomes.len() {
        bail!("Every combination failed; see log for details");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn score(
    observed: PathBuf,
    projected: PathBuf,
    policy: InclusionPolicy,
    cropland_code: i32,
    projected_nodata: i32,
    target_crs: Crs,
    boundaries: Option<PathBuf>,
    country: Option<String>,
    composite: Option<PathBuf>,
) -> Result<()> {
    let store = GeoTiffStore::new(OBSERVED_NODATA);
    let obs = store
        .load(&observed)
        .with_context(|| format!("Failed to load {}", observed.display()))?;
    let proj = store
        .load_with_fallback(&projected, projected_nodata)
        .with_context(|| format!("Failed to load {}", projected.display()))?;

    let mask = match (boundaries, country) {
        (Some(path), Some(name)) => GeoJsonBoundaries::from_path(&path)
            .with_context(|| format!("Failed to read boundaries {}", path.display()))?
            .boundary_for(&name)?,
        _ => RegionMask::from_extent(proj.extent(), proj.require_crs()?)?,
    };

    let pair = align_pair(&obs, &proj, &mask, target_crs)?;
    let eval = evaluate(&pair, policy, cropland_code)?;
    if let Some(path) = composite {
        store
            .save(&eval.composite, &path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), nodata = COMPOSITE_NODATA, "composite written");
    }
    println!("{}", serde_json::to_string_pretty(&eval.matrix)?);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level);

    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .context("Failed to configure worker threads")?;
    }

    match args.command {
        Command::Batch { config, scenario, year, output, composites } => {
            batch(config, scenario, year, output, composites)
        }
        Command::Score {
            observed,
            projected,
            policy,
            cropland_code,
            projected_nodata,
            target_crs,
            boundaries,
            country,
            composite,
        } => score(observed, projected, policy, cropland_code, projected_nodata, target_crs, boundaries, country, composite),
    }
}
