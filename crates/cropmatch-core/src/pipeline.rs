//! Batch orchestration over scenario × year × inclusion policy.
//!
//! Alignment is the expensive step and does not depend on the policy, so jobs
//! are grouped per (scenario, year): both rasters are aligned once and every
//! policy is scored from the same aligned pair. A failing group is logged and
//! reported; it never aborts its siblings.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::align::{align_pair, AlignedPair};
use crate::boundary::BoundaryProvider;
use crate::crs::Crs;
use crate::error::{HarmonizeError, Result};
use crate::mask::RegionMask;
use crate::overlay::{overlay, score, tally, ConfusionMatrix, Tally};
use crate::raster::CategoricalRaster;
use crate::reclass::reclassify;
use crate::storage::RasterStore;
use crate::tables::{projected_table, InclusionPolicy, OBSERVED_NODATA, PROJECTED_NODATA};

// ── Configuration ────────────────────────────────────────────────────────────

/// A projected year, optionally compared against a different observed year
/// (`2050` or `{"year": 2050, "observed_year": 2020}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YearSpec {
    Same(u16),
    Paired { year: u16, observed_year: u16 },
}

impl YearSpec {
    pub fn year(self) -> u16 {
        match self {
            YearSpec::Same(y) | YearSpec::Paired { year: y, .. } => y,
        }
    }

    pub fn observed_year(self) -> u16 {
        match self {
            YearSpec::Same(y) => y,
            YearSpec::Paired { observed_year, .. } => observed_year,
        }
    }
}

fn default_target_crs() -> Crs {
    Crs::WGS84
}

fn default_policies() -> Vec<InclusionPolicy> {
    InclusionPolicy::ALL.to_vec()
}

fn default_observed_nodata() -> i32 {
    OBSERVED_NODATA
}

fn default_projected_nodata() -> i32 {
    PROJECTED_NODATA
}

/// JSON run file describing one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Region name looked up in the boundary file.
    pub country: String,
    /// GeoJSON FeatureCollection holding the region boundary.
    pub boundaries: PathBuf,
    #[serde(default = "default_target_crs")]
    pub target_crs: Crs,
    /// Observed raster path with a `{year}` placeholder.
    pub observed_template: String,
    /// Projected raster path with `{scenario}` and `{year}` placeholders.
    pub projected_template: String,
    /// Code of the cropland class in the projected rasters.
    pub cropland_code: i32,
    /// Nodata markers assumed when a raster file records none.
    #[serde(default = "default_observed_nodata")]
    pub observed_nodata: i32,
    #[serde(default = "default_projected_nodata")]
    pub projected_nodata: i32,
    pub scenarios: Vec<String>,
    pub years: Vec<YearSpec>,
    #[serde(default = "default_policies")]
    pub policies: Vec<InclusionPolicy>,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub write_composites: bool,
}

impl RunConfig {
    /// Read and validate a run file. Relative paths are resolved against the
    /// file's directory.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: RunConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| -> Result<()> { Err(HarmonizeError::InvalidConfig(msg.to_owned())) };
        if self.country.trim().is_empty() {
            return fail("country is empty");
        }
        if self.scenarios.is_empty() || self.years.is_empty() || self.policies.is_empty() {
            return fail("scenarios, years and policies must each list at least one entry");
        }
        if !self.observed_template.contains("{year}") {
            return fail("observed_template lacks a {year} placeholder");
        }
        if self.scenarios.len() > 1 && !self.projected_template.contains("{scenario}") {
            return fail("projected_template lacks a {scenario} placeholder");
        }
        if self.years.len() > 1 && !self.projected_template.contains("{year}") {
            return fail("projected_template lacks a {year} placeholder");
        }
        Ok(())
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let join = |p: &str| -> String {
            if Path::new(p).is_relative() {
                base.join(p).to_string_lossy().into_owned()
            } else {
                p.to_owned()
            }
        };
        self.observed_template = join(&self.observed_template);
        self.projected_template = join(&self.projected_template);
        if self.boundaries.is_relative() {
            self.boundaries = base.join(&self.boundaries);
        }
        if self.output_dir.is_relative() {
            self.output_dir = base.join(&self.output_dir);
        }
    }

    /// Keep only the given scenario and/or projected year.
    pub fn retain(&mut self, scenario: Option<&str>, year: Option<u16>) {
        if let Some(s) = scenario {
            self.scenarios.retain(|x| x == s);
        }
        if let Some(y) = year {
            self.years.retain(|x| x.year() == y);
        }
    }

    pub fn observed_path(&self, observed_year: u16) -> PathBuf {
        PathBuf::from(self.observed_template.replace("{year}", &observed_year.to_string()))
    }

    pub fn projected_path(&self, scenario: &str, year: u16) -> PathBuf {
        PathBuf::from(
            self.projected_template
                .replace("{scenario}", scenario)
                .replace("{year}", &year.to_string()),
        )
    }

    /// Every (scenario, year) group, scenarios outermost.
    pub fn jobs(&self) -> Vec<Job> {
        self.scenarios
            .iter()
            .flat_map(|s| self.years.iter().map(move |&y| Job { scenario: s.clone(), year: y }))
            .collect()
    }

    /// Every combination the batch will score, in output order.
    pub fn combinations(&self) -> Vec<Combination> {
        self.jobs()
            .iter()
            .flat_map(|job| self.policies.iter().map(move |&p| job.combination(p)))
            .collect()
    }
}

// ── Results ──────────────────────────────────────────────────────────────────

/// One (scenario, year) alignment group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub scenario: String,
    pub year: YearSpec,
}

impl Job {
    fn combination(&self, policy: InclusionPolicy) -> Combination {
        Combination {
            scenario: self.scenario.clone(),
            year: self.year.year(),
            observed_year: self.year.observed_year(),
            policy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Combination {
    pub scenario: String,
    pub year: u16,
    pub observed_year: u16,
    pub policy: InclusionPolicy,
}

impl Combination {
    /// File stem used for this combination's outputs.
    pub fn stem(&self) -> String {
        format!("{}_{}_{}", self.scenario, self.year, self.policy)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCombination {
    pub combination: Combination,
    pub tally: Tally,
    pub matrix: ConfusionMatrix,
    /// Composite raster written for this combination, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CombinationOutcome {
    Scored(ScoredCombination),
    Failed { combination: Combination, error: String },
}

impl CombinationOutcome {
    pub fn combination(&self) -> &Combination {
        match self {
            CombinationOutcome::Scored(s) => &s.combination,
            CombinationOutcome::Failed { combination, .. } => combination,
        }
    }

    pub fn is_scored(&self) -> bool {
        matches!(self, CombinationOutcome::Scored(_))
    }
}

/// Composite raster and its confusion matrix for one policy.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub composite: CategoricalRaster,
    pub tally: Tally,
    pub matrix: ConfusionMatrix,
}

/// Reclassify an aligned pair under `policy`, overlay and score it.
pub fn evaluate(pair: &AlignedPair, policy: InclusionPolicy, cropland_code: i32) -> Result<Evaluation> {
    let observed = reclassify(&pair.observed, &policy.remap_table())?;
    let projected = reclassify(&pair.projected, &projected_table(cropland_code))?;
    let composite = overlay(&observed, &projected)?;
    let tally = tally(&composite)?;
    let matrix = score(&tally);
    Ok(Evaluation { composite, tally, matrix })
}

// ── Orchestrator ─────────────────────────────────────────────────────────────

/// Runs a [`RunConfig`] against a raster store and a boundary source.
pub struct Pipeline<S, B> {
    config: RunConfig,
    store: S,
    boundaries: B,
}

impl<S: RasterStore, B: BoundaryProvider> Pipeline<S, B> {
    pub fn new(config: RunConfig, store: S, boundaries: B) -> Self {
        Self { config, store, boundaries }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Score every combination. Only a missing or invalid region boundary is
    /// fatal; per-combination failures are returned as `Failed` outcomes.
    pub fn run_batch(&self) -> Result<Vec<CombinationOutcome>> {
        let mask = self.boundaries.boundary_for(&self.config.country)?;
        let jobs = self.config.jobs();
        info!(
            country = %self.config.country,
            jobs = jobs.len(),
            policies = self.config.policies.len(),
            "batch started"
        );

        #[cfg(feature = "threading")]
        let groups: Vec<Vec<CombinationOutcome>> = {
            use rayon::prelude::*;
            jobs.par_iter().map(|job| self.run_job(job, &mask)).collect()
        };
        #[cfg(not(feature = "threading"))]
        let groups: Vec<Vec<CombinationOutcome>> = jobs.iter().map(|job| self.run_job(job, &mask)).collect();

        let outcomes: Vec<CombinationOutcome> = groups.into_iter().flatten().collect();
        let failed = outcomes.iter().filter(|o| !o.is_scored()).count();
        info!(scored = outcomes.len() - failed, failed, "batch finished");
        Ok(outcomes)
    }

    /// Align one (scenario, year) pair and score it under every policy.
    pub fn run_job(&self, job: &Job, mask: &RegionMask) -> Vec<CombinationOutcome> {
        let fail_all = |error: &HarmonizeError| -> Vec<CombinationOutcome> {
            warn!(scenario = %job.scenario, year = job.year.year(), %error, "alignment failed");
            self.config
                .policies
                .iter()
                .map(|&p| CombinationOutcome::Failed { combination: job.combination(p), error: error.to_string() })
                .collect()
        };
        let pair = match self.load_and_align(job, mask) {
            Ok(pair) => pair,
            Err(e) => return fail_all(&e),
        };

        self.config
            .policies
            .iter()
            .map(|&policy| {
                let combination = job.combination(policy);
                match self.score_policy(&pair, &combination) {
                    Ok(scored) => {
                        info!(
                            combination = %combination.stem(),
                            sensitivity = scored.matrix.sensitivity,
                            specificity = scored.matrix.specificity,
                            "combination scored"
                        );
                        CombinationOutcome::Scored(scored)
                    }
                    Err(error) => {
                        warn!(combination = %combination.stem(), %error, "combination failed");
                        CombinationOutcome::Failed { combination, error: error.to_string() }
                    }
                }
            })
            .collect()
    }

    fn load_and_align(&self, job: &Job, mask: &RegionMask) -> Result<AlignedPair> {
        let observed = self
            .store
            .load_with_fallback(&self.config.observed_path(job.year.observed_year()), self.config.observed_nodata)?;
        let projected = self.store.load_with_fallback(
            &self.config.projected_path(&job.scenario, job.year.year()),
            self.config.projected_nodata,
        )?;
        align_pair(&observed, &projected, mask, self.config.target_crs)
    }

    fn score_policy(&self, pair: &AlignedPair, combination: &Combination) -> Result<ScoredCombination> {
        let eval = evaluate(pair, combination.policy, self.config.cropland_code)?;
        let composite = if self.config.write_composites {
            let path = self.config.output_dir.join("composites").join(format!("{}.tif", combination.stem()));
            self.store.save(&eval.composite, &path)?;
            Some(path)
        } else {
            None
        };
        Ok(ScoredCombination { combination: combination.clone(), tally: eval.tally, matrix: eval.matrix, composite })
    }
}

// ── Summaries ────────────────────────────────────────────────────────────────

/// Write outcomes as pretty JSON, creating parent directories.
pub fn write_summary(outcomes: &[CombinationOutcome], path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(outcomes)?)?;
    Ok(())
}

pub fn read_summary(path: &Path) -> Result<Vec<CombinationOutcome>> {
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

/// One flat CSV row. `None` fields are written empty.
#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    scenario: &'a str,
    year: u16,
    observed_year: u16,
    policy: InclusionPolicy,
    status: &'static str,
    tp: Option<u64>,
    #[serde(rename = "fn")]
    fn_: Option<u64>,
    fp: Option<u64>,
    tn: Option<u64>,
    sensitivity: Option<String>,
    specificity: Option<String>,
    false_positive_rate: Option<String>,
    false_negative_rate: Option<String>,
    accuracy: Option<String>,
    precision: Option<String>,
}

fn fmt_rate(v: f64) -> Option<String> {
    (!v.is_nan()).then(|| format!("{v:.6}"))
}

impl<'a> SummaryRow<'a> {
    fn from_outcome(outcome: &'a CombinationOutcome) -> Self {
        let c = outcome.combination();
        let mut row = SummaryRow {
            scenario: &c.scenario,
            year: c.year,
            observed_year: c.observed_year,
            policy: c.policy,
            status: "failed",
            tp: None,
            fn_: None,
            fp: None,
            tn: None,
            sensitivity: None,
            specificity: None,
            false_positive_rate: None,
            false_negative_rate: None,
            accuracy: None,
            precision: None,
        };
        if let CombinationOutcome::Scored(s) = outcome {
            let m = &s.matrix;
            row.status = "scored";
            row.tp = Some(m.true_positive);
            row.fn_ = Some(m.false_negative);
            row.fp = Some(m.false_positive);
            row.tn = Some(m.true_negative);
            row.sensitivity = fmt_rate(m.sensitivity);
            row.specificity = fmt_rate(m.specificity);
            row.false_positive_rate = fmt_rate(m.false_positive_rate);
            row.false_negative_rate = fmt_rate(m.false_negative_rate);
            row.accuracy = fmt_rate(m.accuracy);
            row.precision = fmt_rate(m.precision);
        }
        row
    }
}

/// CSV table, one row per combination, written to `writer`. Undefined rates
/// and the counts of failed combinations are left empty.
pub fn write_summary_csv<W: std::io::Write>(outcomes: &[CombinationOutcome], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for outcome in outcomes {
        wtr.serialize(SummaryRow::from_outcome(outcome))?;
    }
    wtr.flush()?;
    Ok(())
}
