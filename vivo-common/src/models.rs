//! Study entities
//!
//! Shapes shared by the server store, the sync wire protocol and the field
//! client's local cache. Ids are server-assigned and positive; the field
//! client uses negative ids for rows it has written optimistically and not
//! yet seen confirmed.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::derived::{DerivationConfig, DerivedFields, RawObservation};
use crate::endpoint::EndpointThresholds;
use crate::survival::SurvivalInput;
use crate::Error;

/// Subject life-cycle status; every non-alive status is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectStatus {
    Alive,
    Dead,
    Sacrificed,
    Excluded,
}

impl SubjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectStatus::Alive => "alive",
            SubjectStatus::Dead => "dead",
            SubjectStatus::Sacrificed => "sacrificed",
            SubjectStatus::Excluded => "excluded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubjectStatus::Alive)
    }
}

impl fmt::Display for SubjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alive" => Ok(SubjectStatus::Alive),
            "dead" => Ok(SubjectStatus::Dead),
            "sacrificed" => Ok(SubjectStatus::Sacrificed),
            "excluded" => Ok(SubjectStatus::Excluded),
            other => Err(Error::InvalidInput(format!("unknown subject status: {}", other))),
        }
    }
}

/// How a subject left the study
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitType {
    /// Found dead
    NaturalDeath,
    /// Euthanised after reaching a humane endpoint
    HumaneEndpoint,
    /// Planned terminal collection
    ScheduledSacrifice,
    /// Removed from analysis
    Excluded,
}

impl ExitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitType::NaturalDeath => "natural_death",
            ExitType::HumaneEndpoint => "humane_endpoint",
            ExitType::ScheduledSacrifice => "scheduled_sacrifice",
            ExitType::Excluded => "excluded",
        }
    }

    /// Status the subject moves to on this exit
    pub fn resulting_status(&self) -> SubjectStatus {
        match self {
            ExitType::NaturalDeath => SubjectStatus::Dead,
            ExitType::HumaneEndpoint | ExitType::ScheduledSacrifice => SubjectStatus::Sacrificed,
            ExitType::Excluded => SubjectStatus::Excluded,
        }
    }

    /// Whether this exit counts as an event (death) for survival analysis.
    /// Scheduled sacrifice and exclusion are censored exits.
    pub fn is_event(&self) -> bool {
        matches!(self, ExitType::NaturalDeath | ExitType::HumaneEndpoint)
    }
}

impl fmt::Display for ExitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExitType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "natural_death" => Ok(ExitType::NaturalDeath),
            "humane_endpoint" => Ok(ExitType::HumaneEndpoint),
            "scheduled_sacrifice" => Ok(ExitType::ScheduledSacrifice),
            "excluded" => Ok(ExitType::Excluded),
            other => Err(Error::InvalidInput(format!("unknown exit type: {}", other))),
        }
    }
}

/// Comparison applied to the CSS endpoint threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CssOperator {
    #[default]
    #[serde(rename = ">=")]
    AtLeast,
    #[serde(rename = ">")]
    Above,
}

impl CssOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            CssOperator::AtLeast => ">=",
            CssOperator::Above => ">",
        }
    }

    pub fn reached(&self, value: i64, threshold: i64) -> bool {
        match self {
            CssOperator::AtLeast => value >= threshold,
            CssOperator::Above => value > threshold,
        }
    }
}

impl FromStr for CssOperator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">=" => Ok(CssOperator::AtLeast),
            ">" => Ok(CssOperator::Above),
            other => Err(Error::InvalidInput(format!("unknown CSS operator: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: i64,
    pub name: String,
    pub start_date: NaiveDate,
    pub baseline_day_offset: i64,
    /// Percent weight loss at which a subject reaches its humane endpoint
    pub weight_loss_endpoint_pct: Option<f64>,
    pub css_endpoint_threshold: Option<i64>,
    pub css_endpoint_operator: CssOperator,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Experiment {
    pub fn derivation_config(&self) -> DerivationConfig {
        DerivationConfig {
            start_date: self.start_date,
            baseline_day_offset: self.baseline_day_offset,
        }
    }

    pub fn endpoint_thresholds(&self) -> EndpointThresholds {
        EndpointThresholds {
            weight_loss_pct: self.weight_loss_endpoint_pct,
            css_threshold: self.css_endpoint_threshold,
            css_operator: self.css_endpoint_operator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentGroup {
    pub id: i64,
    pub experiment_id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: i64,
    pub experiment_id: i64,
    pub treatment_group_id: Option<i64>,
    /// Cage card / ear tag identifier
    pub label: String,
    pub baseline_weight: Option<f64>,
    pub status: SubjectStatus,
    pub exit_date: Option<NaiveDate>,
    pub exit_type: Option<ExitType>,
    pub exit_reason: Option<String>,
}

impl Subject {
    /// Survival record of this subject relative to the experiment start
    pub fn survival_input(&self, start_date: NaiveDate) -> SurvivalInput {
        match (self.exit_date, self.exit_type) {
            (Some(date), Some(exit_type)) => SurvivalInput {
                exit_day: Some(crate::derived::day_of_study(date, start_date)),
                is_event: exit_type.is_event(),
            },
            _ => SurvivalInput {
                exit_day: None,
                is_event: false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: i64,
    pub subject_id: i64,
    pub experiment_id: i64,
    pub observation_date: NaiveDate,
    pub weight: Option<f64>,
    pub stool_score: Option<i64>,
    pub behavior_score: Option<i64>,
    pub notes: Option<String>,
    #[serde(flatten)]
    pub derived: DerivedFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Observation {
    pub fn raw(&self) -> RawObservation {
        RawObservation {
            observation_date: self.observation_date,
            weight: self.weight,
            stool_score: self.stool_score,
            behavior_score: self.behavior_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: i64,
    pub subject_id: i64,
    pub experiment_id: i64,
    pub sample_type: String,
    pub collection_date: NaiveDate,
    pub day_of_study: i64,
    pub storage_location: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            SubjectStatus::Alive,
            SubjectStatus::Dead,
            SubjectStatus::Sacrificed,
            SubjectStatus::Excluded,
        ] {
            assert_eq!(status.as_str().parse::<SubjectStatus>().unwrap(), status);
        }
        assert!("zombie".parse::<SubjectStatus>().is_err());
    }

    #[test]
    fn test_only_alive_is_non_terminal() {
        assert!(!SubjectStatus::Alive.is_terminal());
        assert!(SubjectStatus::Dead.is_terminal());
        assert!(SubjectStatus::Sacrificed.is_terminal());
        assert!(SubjectStatus::Excluded.is_terminal());
    }

    #[test]
    fn test_exit_types_map_to_status_and_event_flag() {
        assert_eq!(ExitType::NaturalDeath.resulting_status(), SubjectStatus::Dead);
        assert!(ExitType::NaturalDeath.is_event());
        assert_eq!(ExitType::HumaneEndpoint.resulting_status(), SubjectStatus::Sacrificed);
        assert!(ExitType::HumaneEndpoint.is_event());
        assert_eq!(ExitType::ScheduledSacrifice.resulting_status(), SubjectStatus::Sacrificed);
        assert!(!ExitType::ScheduledSacrifice.is_event());
        assert_eq!(ExitType::Excluded.resulting_status(), SubjectStatus::Excluded);
        assert!(!ExitType::Excluded.is_event());
    }

    #[test]
    fn test_exit_type_serializes_snake_case() {
        let json = serde_json::to_string(&ExitType::NaturalDeath).unwrap();
        assert_eq!(json, "\"natural_death\"");
    }

    #[test]
    fn test_css_operator_comparisons() {
        assert!(CssOperator::AtLeast.reached(6, 6));
        assert!(!CssOperator::Above.reached(6, 6));
        assert!(CssOperator::Above.reached(7, 6));
        assert_eq!(serde_json::to_string(&CssOperator::Above).unwrap(), "\">\"");
    }

    #[test]
    fn test_subject_without_exit_is_censored_at_horizon() {
        let subject = Subject {
            id: 1,
            experiment_id: 1,
            treatment_group_id: None,
            label: "M-01".to_string(),
            baseline_weight: None,
            status: SubjectStatus::Alive,
            exit_date: None,
            exit_type: None,
            exit_reason: None,
        };
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let input = subject.survival_input(start);
        assert_eq!(input.exit_day, None);
        assert!(!input.is_event);
    }
}
