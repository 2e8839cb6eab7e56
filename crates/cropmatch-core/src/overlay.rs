//! Composite overlay of an observed (0/1) and a projected (0/10) layer, and
//! the binary confusion matrix derived from it.
//!
//! Disjoint magnitudes let one addition encode all four joint outcomes:
//!   0 = neither, 1 = observed only, 10 = projected only, 11 = both.
//! The observed layer is ground truth.

use serde::{Deserialize, Serialize};

use crate::error::{HarmonizeError, Result};
use crate::raster::CategoricalRaster;

/// Label of a positive observed cell.
pub const OBSERVED_POSITIVE: i32 = 1;
/// Label of a positive projected cell.
pub const PROJECTED_POSITIVE: i32 = 10;
/// Nodata marker of composite rasters; set wherever either input is nodata.
pub const COMPOSITE_NODATA: i32 = -1;

/// Elementwise `reference + predicted` over two same-grid binary rasters.
pub fn overlay(reference: &CategoricalRaster, predicted: &CategoricalRaster) -> Result<CategoricalRaster> {
    let (a, b) = (reference.grid()?, predicted.grid()?);
    if !a.matches(&b) {
        return Err(HarmonizeError::GridMismatch(format!(
            "reference {}×{} {:?} vs predicted {}×{} {:?}",
            a.width, a.height, a.transform, b.width, b.height, b.transform
        )));
    }

    let mut data = Vec::with_capacity(reference.data().len());
    for (&o, &p) in reference.data().iter().zip(predicted.data()) {
        if reference.is_nodata(o) || predicted.is_nodata(p) {
            data.push(COMPOSITE_NODATA);
            continue;
        }
        if o != 0 && o != OBSERVED_POSITIVE {
            return Err(HarmonizeError::UnexpectedCode { layer: "reference", code: o, expected: [0, OBSERVED_POSITIVE] });
        }
        if p != 0 && p != PROJECTED_POSITIVE {
            return Err(HarmonizeError::UnexpectedCode { layer: "predicted", code: p, expected: [0, PROJECTED_POSITIVE] });
        }
        data.push(o + p);
    }
    CategoricalRaster::new(a.width, a.height, a.transform, Some(a.crs), data, COMPOSITE_NODATA)
}

/// Non-nodata cell counts per composite value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tally {
    pub count0: u64,
    pub count1: u64,
    pub count10: u64,
    pub count11: u64,
}

impl Tally {
    pub fn total(&self) -> u64 {
        self.count0 + self.count1 + self.count10 + self.count11
    }
}

pub fn tally(composite: &CategoricalRaster) -> Result<Tally> {
    let mut t = Tally::default();
    for &v in composite.data() {
        match v {
            _ if composite.is_nodata(v) => {}
            0 => t.count0 += 1,
            1 => t.count1 += 1,
            10 => t.count10 += 1,
            11 => t.count11 += 1,
            other => {
                return Err(HarmonizeError::UnexpectedCode { layer: "composite", code: other, expected: [0, 11] })
            }
        }
    }
    Ok(t)
}

/// Which derived rate to read with [`ConfusionMatrix::rate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateKind {
    Sensitivity,
    Specificity,
    FalsePositiveRate,
    FalseNegativeRate,
    Accuracy,
    Precision,
}

impl RateKind {
    pub const ALL: [RateKind; 6] = [
        RateKind::Sensitivity,
        RateKind::Specificity,
        RateKind::FalsePositiveRate,
        RateKind::FalseNegativeRate,
        RateKind::Accuracy,
        RateKind::Precision,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RateKind::Sensitivity => "sensitivity",
            RateKind::Specificity => "specificity",
            RateKind::FalsePositiveRate => "false_positive_rate",
            RateKind::FalseNegativeRate => "false_negative_rate",
            RateKind::Accuracy => "accuracy",
            RateKind::Precision => "precision",
        }
    }

    fn denominator(self) -> &'static str {
        match self {
            RateKind::Sensitivity | RateKind::FalseNegativeRate => "positives (P)",
            RateKind::Specificity | RateKind::FalsePositiveRate => "negatives (N)",
            RateKind::Accuracy => "P + N",
            RateKind::Precision => "TP + FP",
        }
    }
}

/// Binary confusion matrix. Rates whose denominator is zero are NaN
/// (serialised as JSON `null`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_positive: u64,
    pub false_negative: u64,
    pub false_positive: u64,
    pub true_negative: u64,
    #[serde(with = "nan_as_null")]
    pub sensitivity: f64,
    #[serde(with = "nan_as_null")]
    pub specificity: f64,
    #[serde(with = "nan_as_null")]
    pub false_positive_rate: f64,
    #[serde(with = "nan_as_null")]
    pub false_negative_rate: f64,
    #[serde(with = "nan_as_null")]
    pub accuracy: f64,
    #[serde(with = "nan_as_null")]
    pub precision: f64,
}

mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_nan() { s.serialize_none() } else { s.serialize_f64(*v) }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NAN))
    }
}

#[inline]
fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { f64::NAN } else { num as f64 / den as f64 }
}

pub fn score(t: &Tally) -> ConfusionMatrix {
    let (tp, fn_, fp, tn) = (t.count11, t.count1, t.count10, t.count0);
    let positives = tp + fn_;
    let negatives = fp + tn;
    ConfusionMatrix {
        true_positive: tp,
        false_negative: fn_,
        false_positive: fp,
        true_negative: tn,
        sensitivity: ratio(tp, positives),
        specificity: ratio(tn, negatives),
        false_positive_rate: ratio(fp, negatives),
        false_negative_rate: ratio(fn_, positives),
        accuracy: ratio(tp + tn, positives + negatives),
        precision: ratio(tp, tp + fp),
    }
}

impl ConfusionMatrix {
    pub fn positives(&self) -> u64 {
        self.true_positive + self.false_negative
    }

    pub fn negatives(&self) -> u64 {
        self.false_positive + self.true_negative
    }

    fn raw(&self, kind: RateKind) -> f64 {
        match kind {
            RateKind::Sensitivity => self.sensitivity,
            RateKind::Specificity => self.specificity,
            RateKind::FalsePositiveRate => self.false_positive_rate,
            RateKind::FalseNegativeRate => self.false_negative_rate,
            RateKind::Accuracy => self.accuracy,
            RateKind::Precision => self.precision,
        }
    }

    /// Defined value of a rate, or `DegenerateRate` when its denominator is zero.
    pub fn rate(&self, kind: RateKind) -> Result<f64> {
        let v = self.raw(kind);
        if v.is_nan() {
            Err(HarmonizeError::DegenerateRate { rate: kind.name(), denominator: kind.denominator() })
        } else {
            Ok(v)
        }
    }

    /// Names of rates left undefined by zero denominators.
    pub fn undefined_rates(&self) -> Vec<&'static str> {
        RateKind::ALL.iter().filter(|k| self.raw(**k).is_nan()).map(|k| k.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::raster::tests::grid_raster;

    #[test]
    fn two_by_two_scenario() {
        let reference = grid_raster(0.0, 2.0, &[&[0, 1], &[1, 0]], -1);
        let predicted = grid_raster(0.0, 2.0, &[&[0, 10], &[0, 10]], -1);
        let composite = overlay(&reference, &predicted).unwrap();
        assert_eq!(composite.data(), &[0, 11, 1, 10]);

        let t = tally(&composite).unwrap();
        assert_eq!(t, Tally { count0: 1, count1: 1, count10: 1, count11: 1 });

        let cm = score(&t);
        assert_eq!((cm.positives(), cm.negatives()), (2, 2));
        assert_eq!((cm.true_positive, cm.false_negative, cm.false_positive, cm.true_negative), (1, 1, 1, 1));
        assert_relative_eq!(cm.sensitivity, 0.5);
        assert_relative_eq!(cm.specificity, 0.5);
        assert_relative_eq!(cm.accuracy, 0.5);
        assert_relative_eq!(cm.precision, 0.5);
        assert!(cm.undefined_rates().is_empty());
    }

    #[test]
    fn zero_positives_yield_nan_not_panic() {
        let t = Tally { count0: 5, count1: 0, count10: 2, count11: 0 };
        let cm = score(&t);
        assert!(cm.sensitivity.is_nan());
        assert!(cm.false_negative_rate.is_nan());
        assert_relative_eq!(cm.specificity, 5.0 / 7.0);
        assert!(matches!(
            cm.rate(RateKind::Sensitivity),
            Err(HarmonizeError::DegenerateRate { rate: "sensitivity", .. })
        ));
        assert_eq!(cm.undefined_rates(), vec!["sensitivity", "false_negative_rate"]);
    }

    #[test]
    fn undefined_rates_serialise_as_null() {
        let cm = score(&Tally { count0: 3, count1: 0, count10: 1, count11: 0 });
        let json = serde_json::to_string(&cm).unwrap();
        assert!(json.contains("\"sensitivity\":null"));
        let back: ConfusionMatrix = serde_json::from_str(&json).unwrap();
        assert!(back.sensitivity.is_nan());
        assert_relative_eq!(back.specificity, 0.75);
    }

    #[test]
    fn nodata_in_either_input_is_excluded() {
        let reference = grid_raster(0.0, 1.0, &[&[1, -1, 0]], -1);
        let predicted = grid_raster(0.0, 1.0, &[&[10, 10, 255]], 255);
        let composite = overlay(&reference, &predicted).unwrap();
        assert_eq!(composite.data(), &[11, COMPOSITE_NODATA, COMPOSITE_NODATA]);
        assert_eq!(tally(&composite).unwrap().total(), 1);
    }

    #[test]
    fn mismatched_grids_are_rejected() {
        let a = grid_raster(0.0, 1.0, &[&[0, 1]], -1);
        let b = grid_raster(1.0, 1.0, &[&[0, 10]], -1);
        assert!(matches!(overlay(&a, &b), Err(HarmonizeError::GridMismatch(_))));
    }

    #[test]
    fn swapped_layers_are_rejected() {
        let a = grid_raster(0.0, 1.0, &[&[0, 10]], -1);
        let b = grid_raster(0.0, 1.0, &[&[0, 1]], -1);
        assert!(matches!(overlay(&a, &b), Err(HarmonizeError::UnexpectedCode { layer: "reference", .. })));
    }

    #[test]
    fn random_pairs_are_complete_and_consistent() {
        let mut rng = StdRng::seed_from_u64(2024);
        for _ in 0..50 {
            let (w, h) = (rng.gen_range(1..20), rng.gen_range(1..20));
            let obs: Vec<i32> = (0..w * h).map(|_| [0, 1, -1][rng.gen_range(0..3)]).collect();
            let pred: Vec<i32> = (0..w * h).map(|_| [0, 10, -1][rng.gen_range(0..3)]).collect();
            let t = crate::raster::GeoTransform::new(0.0, 0.0, 1.0, -1.0);
            let crs = Some(crate::crs::Crs::WGS84);
            let o = CategoricalRaster::new(w, h, t, crs, obs, -1).unwrap();
            let p = CategoricalRaster::new(w, h, t, crs, pred, -1).unwrap();

            let composite = overlay(&o, &p).unwrap();
            let tl = tally(&composite).unwrap();
            assert_eq!(tl.total() as usize, composite.valid_count());

            let cm = score(&tl);
            assert_eq!(cm.positives() + cm.negatives(), tl.total());
            if cm.positives() > 0 {
                assert_relative_eq!(cm.sensitivity * cm.positives() as f64, cm.true_positive as f64, epsilon = 1e-9);
            }
            if cm.negatives() > 0 {
                assert_relative_eq!(cm.specificity * cm.negatives() as f64, cm.true_negative as f64, epsilon = 1e-9);
            }
            if tl.total() > 0 {
                assert!((0.0..=1.0).contains(&cm.accuracy));
            }
        }
    }
}
