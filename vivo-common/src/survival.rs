//! Kaplan-Meier survival estimation
//!
//! Subjects leave the risk set either through an event (death) or through a
//! censored exit (scheduled sacrifice, exclusion). Only events lower the
//! survival estimate; censored exits shrink the risk set. Subjects that never
//! exited stay at risk through every point of the curve.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Exit record of one subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurvivalInput {
    /// Study day of the exit; `None` while the subject is still on study
    pub exit_day: Option<i64>,
    /// True for death, false for a censored exit
    pub is_event: bool,
}

/// One step of the survival curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurvivalPoint {
    pub day: i64,
    /// Survival in percent after this day's events
    pub survival_pct: f64,
    /// Subjects still at risk after this day's exits
    pub at_risk: usize,
    /// Deaths on this day
    pub events: usize,
}

#[derive(Default)]
struct DayExits {
    deaths: usize,
    censored: usize,
}

/// Compute the Kaplan-Meier curve
///
/// The curve starts with a day-0 point at 100 % covering the full cohort,
/// followed by one point per study day that had exits. Exit days before the
/// study start are counted on day 0.
pub fn kaplan_meier(subjects: &[SurvivalInput]) -> Vec<SurvivalPoint> {
    let mut by_day: BTreeMap<i64, DayExits> = BTreeMap::new();
    for subject in subjects {
        if let Some(day) = subject.exit_day {
            let exits = by_day.entry(day.max(0)).or_default();
            if subject.is_event {
                exits.deaths += 1;
            } else {
                exits.censored += 1;
            }
        }
    }

    let mut at_risk = subjects.len();
    let mut survival = 1.0_f64;
    let mut curve = vec![SurvivalPoint {
        day: 0,
        survival_pct: 100.0,
        at_risk,
        events: 0,
    }];

    for (day, exits) in by_day {
        if at_risk > 0 && exits.deaths > 0 {
            survival *= 1.0 - exits.deaths as f64 / at_risk as f64;
            survival = survival.max(0.0);
        }
        at_risk = at_risk.saturating_sub(exits.deaths + exits.censored);

        let point = SurvivalPoint {
            day,
            survival_pct: survival * 100.0,
            at_risk,
            events: exits.deaths,
        };

        // Day-0 exits fold into the opening point
        if curve.last().map(|last| last.day) == Some(day) {
            if let Some(last) = curve.last_mut() {
                *last = point;
            }
        } else {
            curve.push(point);
        }
    }

    curve
}

/// Survival percentage at `day` read off a step curve
pub fn survival_at(curve: &[SurvivalPoint], day: i64) -> f64 {
    curve
        .iter()
        .take_while(|point| point.day <= day)
        .last()
        .map(|point| point.survival_pct)
        .unwrap_or(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn death(day: i64) -> SurvivalInput {
        SurvivalInput { exit_day: Some(day), is_event: true }
    }

    fn censored(day: i64) -> SurvivalInput {
        SurvivalInput { exit_day: Some(day), is_event: false }
    }

    fn on_study() -> SurvivalInput {
        SurvivalInput { exit_day: None, is_event: false }
    }

    #[test]
    fn test_death_and_censor_on_same_day() {
        // A dies day 5, B sacrificed day 5, C still on study at day 10
        let curve = kaplan_meier(&[death(5), censored(5), on_study()]);

        assert_eq!(curve.len(), 2);
        assert_eq!(curve[0], SurvivalPoint { day: 0, survival_pct: 100.0, at_risk: 3, events: 0 });

        let day5 = curve[1];
        assert_eq!(day5.day, 5);
        assert!((day5.survival_pct - 66.666_666).abs() < 1e-3);
        assert_eq!(day5.at_risk, 1);
        assert_eq!(day5.events, 1);

        assert!((survival_at(&curve, 10) - day5.survival_pct).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_deaths_keeps_full_survival() {
        let curve = kaplan_meier(&[censored(3), censored(8), on_study(), on_study()]);
        assert!(curve.iter().all(|p| (p.survival_pct - 100.0).abs() < f64::EPSILON));
        assert_eq!(curve.last().unwrap().at_risk, 2);
    }

    #[test]
    fn test_censoring_changes_later_step_size() {
        // Censor one of four on day 2; a death on day 4 divides by 3 not 4
        let curve = kaplan_meier(&[censored(2), death(4), on_study(), on_study()]);
        let day4 = curve.iter().find(|p| p.day == 4).unwrap();
        assert!((day4.survival_pct - 100.0 * (2.0 / 3.0)).abs() < 1e-9);
        assert_eq!(day4.at_risk, 2);
    }

    #[test]
    fn test_everyone_dies_reaches_zero() {
        let curve = kaplan_meier(&[death(1), death(2), death(2)]);
        let last = curve.last().unwrap();
        assert_eq!(last.survival_pct, 0.0);
        assert_eq!(last.at_risk, 0);
    }

    #[test]
    fn test_day_zero_exits_fold_into_first_point() {
        let curve = kaplan_meier(&[death(0), on_study()]);
        assert_eq!(curve.len(), 1);
        assert_eq!(curve[0].day, 0);
        assert_eq!(curve[0].events, 1);
        assert!((curve[0].survival_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_cohort() {
        let curve = kaplan_meier(&[]);
        assert_eq!(curve, vec![SurvivalPoint { day: 0, survival_pct: 100.0, at_risk: 0, events: 0 }]);
        assert_eq!(survival_at(&curve, 30), 100.0);
    }

    #[test]
    fn test_curve_is_non_increasing_and_non_negative() {
        // Deterministic pseudo-random exit sequences
        let mut seed: u64 = 0x5eed;
        for _ in 0..200 {
            let mut subjects = Vec::new();
            let count = (seed % 12) as usize + 1;
            for _ in 0..count {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let roll = (seed >> 33) % 10;
                subjects.push(match roll {
                    0..=3 => death(((seed >> 40) % 20) as i64),
                    4..=6 => censored(((seed >> 40) % 20) as i64),
                    _ => on_study(),
                });
            }

            let curve = kaplan_meier(&subjects);
            for pair in curve.windows(2) {
                assert!(pair[1].survival_pct <= pair[0].survival_pct);
                assert!(pair[1].day > pair[0].day);
                assert!(pair[1].at_risk <= pair[0].at_risk);
            }
            assert!(curve.iter().all(|p| p.survival_pct >= 0.0));
        }
    }
}
