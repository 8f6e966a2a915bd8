//! Derived clinical fields
//!
//! Pure functions turning raw observation inputs plus experiment
//! configuration into the derived fields stored alongside every observation:
//! study day, percent weight change, weight score and total clinical
//! severity score (CSS).
//!
//! Clinical fields are never produced before the baseline study day. The
//! gate lives here so no caller can store a CSS for a pre-baseline
//! observation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Experiment settings the derived fields depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivationConfig {
    /// Study day 0
    pub start_date: NaiveDate,
    /// Study day on which the baseline weight is captured
    pub baseline_day_offset: i64,
}

/// Raw clinical inputs of one observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawObservation {
    pub observation_date: NaiveDate,
    pub weight: Option<f64>,
    pub stool_score: Option<i64>,
    pub behavior_score: Option<i64>,
}

/// Derived fields of one observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedFields {
    pub day_of_study: i64,
    pub weight_pct_change: Option<f64>,
    pub weight_score: Option<i64>,
    pub total_css: Option<i64>,
}

impl DerivedFields {
    /// Derived fields with only the study day set
    pub fn unscored(day_of_study: i64) -> Self {
        Self {
            day_of_study,
            weight_pct_change: None,
            weight_score: None,
            total_css: None,
        }
    }
}

/// Whole days between `date` and the experiment start; negative before start
pub fn day_of_study(date: NaiveDate, start_date: NaiveDate) -> i64 {
    date.signed_duration_since(start_date).num_days()
}

/// Round to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Percent change of `weight` relative to `baseline_weight`
///
/// Absent when either weight is missing or the baseline is zero.
pub fn weight_pct_change(weight: Option<f64>, baseline_weight: Option<f64>) -> Option<f64> {
    let weight = weight?;
    let baseline = baseline_weight?;
    if baseline == 0.0 {
        return None;
    }
    Some(round2((weight - baseline) / baseline * 100.0))
}

/// Banded weight score
///
/// | change        | score |
/// |---------------|-------|
/// | >= 0 %        | 0     |
/// | >= -4 %       | 1     |
/// | >= -9 %       | 2     |
/// | >= -14 %      | 3     |
/// | below -14 %   | 4     |
pub fn weight_score(pct_change: f64) -> i64 {
    if pct_change >= 0.0 {
        0
    } else if pct_change >= -4.0 {
        1
    } else if pct_change >= -9.0 {
        2
    } else if pct_change >= -14.0 {
        3
    } else {
        4
    }
}

/// Compute all derived fields for one observation
///
/// Deterministic: the output depends only on the arguments.
pub fn compute_derived_fields(
    raw: &RawObservation,
    baseline_weight: Option<f64>,
    config: &DerivationConfig,
) -> DerivedFields {
    let day = day_of_study(raw.observation_date, config.start_date);

    // CSS scoring has not started before the baseline day
    if day < config.baseline_day_offset {
        return DerivedFields::unscored(day);
    }

    let pct_change = weight_pct_change(raw.weight, baseline_weight);
    let score = pct_change.map(weight_score);
    let total_css = match (score, raw.stool_score, raw.behavior_score) {
        (Some(w), Some(s), Some(b)) => Some(w + s + b),
        _ => None,
    };

    DerivedFields {
        day_of_study: day,
        weight_pct_change: pct_change,
        weight_score: score,
        total_css,
    }
}

/// Baseline weight latched by this observation, if any
///
/// The first weighed observation on the baseline day sets the subject's
/// baseline; once set it is left alone.
pub fn latched_baseline(
    raw: &RawObservation,
    current_baseline: Option<f64>,
    config: &DerivationConfig,
) -> Option<f64> {
    if current_baseline.is_some() {
        return None;
    }
    if day_of_study(raw.observation_date, config.start_date) != config.baseline_day_offset {
        return None;
    }
    raw.weight
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn config(offset: i64) -> DerivationConfig {
        DerivationConfig {
            start_date: date(2024, 1, 1),
            baseline_day_offset: offset,
        }
    }

    fn raw(d: NaiveDate, weight: Option<f64>, stool: Option<i64>, behavior: Option<i64>) -> RawObservation {
        RawObservation {
            observation_date: d,
            weight,
            stool_score: stool,
            behavior_score: behavior,
        }
    }

    #[test]
    fn test_day_of_study_counts_whole_days() {
        assert_eq!(day_of_study(date(2024, 1, 1), date(2024, 1, 1)), 0);
        assert_eq!(day_of_study(date(2024, 1, 5), date(2024, 1, 1)), 4);
        assert_eq!(day_of_study(date(2024, 3, 1), date(2024, 2, 28)), 2); // leap year
    }

    #[test]
    fn test_day_of_study_negative_before_start() {
        assert_eq!(day_of_study(date(2023, 12, 29), date(2024, 1, 1)), -3);
    }

    #[test]
    fn test_weight_drop_of_fifteen_percent_scores_four() {
        let fields = compute_derived_fields(
            &raw(date(2024, 1, 5), Some(17.0), None, None),
            Some(20.0),
            &config(0),
        );
        assert_eq!(fields.day_of_study, 4);
        assert_eq!(fields.weight_pct_change, Some(-15.0));
        assert_eq!(fields.weight_score, Some(4));
        assert_eq!(fields.total_css, None);
    }

    #[test]
    fn test_total_css_sums_all_three_scores() {
        let fields = compute_derived_fields(
            &raw(date(2024, 1, 5), Some(17.0), Some(2), Some(1)),
            Some(20.0),
            &config(0),
        );
        assert_eq!(fields.total_css, Some(7));
    }

    #[test]
    fn test_total_css_requires_every_operand() {
        let missing_behavior = compute_derived_fields(
            &raw(date(2024, 1, 5), Some(19.0), Some(2), None),
            Some(20.0),
            &config(0),
        );
        assert_eq!(missing_behavior.weight_score, Some(2));
        assert_eq!(missing_behavior.total_css, None);

        let missing_weight = compute_derived_fields(
            &raw(date(2024, 1, 5), None, Some(2), Some(1)),
            Some(20.0),
            &config(0),
        );
        assert_eq!(missing_weight.weight_pct_change, None);
        assert_eq!(missing_weight.total_css, None);
    }

    #[test]
    fn test_no_scores_before_baseline_day() {
        // Baseline on day 3: day 2 stays unscored whatever the inputs
        let fields = compute_derived_fields(
            &raw(date(2024, 1, 3), Some(10.0), Some(3), Some(3)),
            Some(20.0),
            &config(3),
        );
        assert_eq!(fields, DerivedFields::unscored(2));
    }

    #[test]
    fn test_zero_baseline_yields_no_change() {
        assert_eq!(weight_pct_change(Some(10.0), Some(0.0)), None);
        assert_eq!(weight_pct_change(None, Some(20.0)), None);
        assert_eq!(weight_pct_change(Some(10.0), None), None);
    }

    #[test]
    fn test_weight_pct_change_rounds_to_two_decimals() {
        assert_eq!(weight_pct_change(Some(20.1), Some(21.0)), Some(-4.29));
        assert_eq!(weight_pct_change(Some(22.0), Some(21.0)), Some(4.76));
    }

    #[test]
    fn test_weight_score_band_edges() {
        assert_eq!(weight_score(5.0), 0);
        assert_eq!(weight_score(0.0), 0);
        assert_eq!(weight_score(-0.01), 1);
        assert_eq!(weight_score(-4.0), 1);
        assert_eq!(weight_score(-4.01), 2);
        assert_eq!(weight_score(-9.0), 2);
        assert_eq!(weight_score(-9.01), 3);
        assert_eq!(weight_score(-14.0), 3);
        assert_eq!(weight_score(-14.01), 4);
        assert_eq!(weight_score(-60.0), 4);
    }

    #[test]
    fn test_weight_score_is_monotonic() {
        let mut previous = weight_score(10.0);
        let mut pct = 10.0;
        while pct > -30.0 {
            let score = weight_score(pct);
            assert!(score >= previous, "score dropped at {}", pct);
            previous = score;
            pct -= 0.25;
        }
    }

    #[test]
    fn test_compute_is_deterministic() {
        for offset in -2..5 {
            for day in 0..10u32 {
                for weight in [None, Some(18.5), Some(21.0)] {
                    let input = raw(date(2024, 1, 1 + day), weight, Some(1), Some(2));
                    let first = compute_derived_fields(&input, Some(20.0), &config(offset));
                    let second = compute_derived_fields(&input, Some(20.0), &config(offset));
                    assert_eq!(first, second);
                }
            }
        }
    }

    #[test]
    fn test_baseline_latches_only_on_baseline_day() {
        let cfg = config(0);
        let baseline_day = raw(date(2024, 1, 1), Some(20.0), None, None);
        let later_day = raw(date(2024, 1, 2), Some(19.0), None, None);

        assert_eq!(latched_baseline(&baseline_day, None, &cfg), Some(20.0));
        assert_eq!(latched_baseline(&later_day, None, &cfg), None);
    }

    #[test]
    fn test_baseline_latch_fires_once() {
        let cfg = config(0);
        let resubmitted = raw(date(2024, 1, 1), Some(25.0), None, None);
        assert_eq!(latched_baseline(&resubmitted, Some(20.0), &cfg), None);
    }

    #[test]
    fn test_baseline_latch_needs_a_weight() {
        let cfg = config(0);
        let unweighed = raw(date(2024, 1, 1), None, Some(1), Some(0));
        assert_eq!(latched_baseline(&unweighed, None, &cfg), None);
    }
}
