//! Sync wire protocol
//!
//! The field client pushes [`MutationEnvelope`]s and pulls [`Snapshot`]s.
//! Envelopes carry the mutation kind as free text so that a single unknown or
//! malformed mutation fails on its own instead of rejecting the whole push;
//! [`Mutation::from_envelope`] turns an envelope into the closed set of
//! mutation variants the server knows how to apply.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::derived::RawObservation;
use crate::models::{Experiment, ExitType, Observation, Sample, Subject, TreatmentGroup};
use crate::{Error, Result};

/// Mutation kinds understood by the reconciliation endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    CreateObservation,
    CreateObservationsBatch,
    RecordExit,
    CreateSamplesBatch,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::CreateObservation => "createObservation",
            MutationKind::CreateObservationsBatch => "createObservationsBatch",
            MutationKind::RecordExit => "recordExit",
            MutationKind::CreateSamplesBatch => "createSamplesBatch",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "createObservation" => Some(MutationKind::CreateObservation),
            "createObservationsBatch" => Some(MutationKind::CreateObservationsBatch),
            "recordExit" => Some(MutationKind::RecordExit),
            "createSamplesBatch" => Some(MutationKind::CreateSamplesBatch),
            _ => None,
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw clinical observation as entered on the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationInput {
    pub subject_id: i64,
    pub observation_date: NaiveDate,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub stool_score: Option<i64>,
    #[serde(default)]
    pub behavior_score: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ObservationInput {
    pub fn validate(&self) -> Result<()> {
        if self.subject_id <= 0 {
            return Err(Error::InvalidInput(format!(
                "subject_id {} does not reference a registered subject",
                self.subject_id
            )));
        }
        if let Some(weight) = self.weight {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(Error::InvalidInput(format!("weight must be positive, got {}", weight)));
            }
        }
        for (name, score) in [("stool_score", self.stool_score), ("behavior_score", self.behavior_score)] {
            if matches!(score, Some(s) if s < 0) {
                return Err(Error::InvalidInput(format!("{} must not be negative", name)));
            }
        }
        Ok(())
    }

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
pub struct ObservationsBatch {
    pub observations: Vec<ObservationInput>,
}

/// Subject exit, optionally with the final clinical observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitInput {
    pub subject_id: i64,
    pub exit_date: NaiveDate,
    pub exit_type: ExitType,
    #[serde(default)]
    pub exit_reason: Option<String>,
    #[serde(default)]
    pub final_observation: Option<ObservationInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleInput {
    pub subject_id: i64,
    pub sample_type: String,
    pub collection_date: NaiveDate,
    #[serde(default)]
    pub storage_location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplesBatch {
    pub samples: Vec<SampleInput>,
}

/// A write intent, one variant per mutation kind
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    CreateObservation(ObservationInput),
    CreateObservationsBatch(ObservationsBatch),
    RecordExit(ExitInput),
    CreateSamplesBatch(SamplesBatch),
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::CreateObservation(_) => MutationKind::CreateObservation,
            Mutation::CreateObservationsBatch(_) => MutationKind::CreateObservationsBatch,
            Mutation::RecordExit(_) => MutationKind::RecordExit,
            Mutation::CreateSamplesBatch(_) => MutationKind::CreateSamplesBatch,
        }
    }

    /// Decode a mutation from its kind tag and JSON payload
    pub fn from_parts(kind: &str, payload: Value) -> Result<Self> {
        let kind = MutationKind::parse(kind)
            .ok_or_else(|| Error::InvalidInput(format!("unknown mutation type: {}", kind)))?;

        let mutation = match kind {
            MutationKind::CreateObservation => Mutation::CreateObservation(serde_json::from_value(payload)?),
            MutationKind::CreateObservationsBatch => {
                Mutation::CreateObservationsBatch(serde_json::from_value(payload)?)
            }
            MutationKind::RecordExit => Mutation::RecordExit(serde_json::from_value(payload)?),
            MutationKind::CreateSamplesBatch => Mutation::CreateSamplesBatch(serde_json::from_value(payload)?),
        };
        Ok(mutation)
    }

    pub fn from_envelope(envelope: &MutationEnvelope) -> Result<Self> {
        Self::from_parts(&envelope.kind, envelope.payload.clone())
    }

    pub fn to_payload(&self) -> Result<Value> {
        let payload = match self {
            Mutation::CreateObservation(input) => serde_json::to_value(input)?,
            Mutation::CreateObservationsBatch(batch) => serde_json::to_value(batch)?,
            Mutation::RecordExit(exit) => serde_json::to_value(exit)?,
            Mutation::CreateSamplesBatch(batch) => serde_json::to_value(batch)?,
        };
        Ok(payload)
    }

    /// Reject missing or malformed fields before any side effect
    pub fn validate(&self) -> Result<()> {
        match self {
            Mutation::CreateObservation(input) => input.validate(),
            Mutation::CreateObservationsBatch(batch) => {
                if batch.observations.is_empty() {
                    return Err(Error::InvalidInput("observation batch is empty".to_string()));
                }
                let mut seen = std::collections::HashSet::new();
                for input in &batch.observations {
                    input.validate()?;
                    if !seen.insert((input.subject_id, input.observation_date)) {
                        return Err(Error::InvalidInput(format!(
                            "observation batch repeats subject {} on {}",
                            input.subject_id, input.observation_date
                        )));
                    }
                }
                Ok(())
            }
            Mutation::RecordExit(exit) => {
                if exit.subject_id <= 0 {
                    return Err(Error::InvalidInput(format!(
                        "subject_id {} does not reference a registered subject",
                        exit.subject_id
                    )));
                }
                if let Some(observation) = &exit.final_observation {
                    observation.validate()?;
                    if observation.subject_id != exit.subject_id {
                        return Err(Error::InvalidInput(
                            "final observation belongs to a different subject".to_string(),
                        ));
                    }
                }
                Ok(())
            }
            Mutation::CreateSamplesBatch(batch) => {
                if batch.samples.is_empty() {
                    return Err(Error::InvalidInput("sample batch is empty".to_string()));
                }
                for sample in &batch.samples {
                    if sample.subject_id <= 0 {
                        return Err(Error::InvalidInput(format!(
                            "subject_id {} does not reference a registered subject",
                            sample.subject_id
                        )));
                    }
                    if sample.sample_type.trim().is_empty() {
                        return Err(Error::InvalidInput("sample_type is required".to_string()));
                    }
                }
                Ok(())
            }
        }
    }

    /// Subjects this mutation writes to
    pub fn subject_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = match self {
            Mutation::CreateObservation(input) => vec![input.subject_id],
            Mutation::CreateObservationsBatch(batch) => batch.observations.iter().map(|o| o.subject_id).collect(),
            Mutation::RecordExit(exit) => vec![exit.subject_id],
            Mutation::CreateSamplesBatch(batch) => batch.samples.iter().map(|s| s.subject_id).collect(),
        };
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// A queued mutation as sent over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationEnvelope {
    pub id: Uuid,
    pub kind: String,
    pub payload: Value,
    pub client_timestamp: DateTime<Utc>,
}

impl MutationEnvelope {
    pub fn new(id: Uuid, mutation: &Mutation, client_timestamp: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            id,
            kind: mutation.kind().as_str().to_string(),
            payload: mutation.to_payload()?,
            client_timestamp,
        })
    }
}

/// Per-mutation result of a push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationOutcome {
    pub id: Uuid,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<bool>,
}

impl MutationOutcome {
    pub fn applied(id: Uuid) -> Self {
        Self { id, success: true, error: None, conflict: None }
    }

    pub fn failed(id: Uuid, error: impl Into<String>) -> Self {
        Self { id, success: false, error: Some(error.into()), conflict: None }
    }

    /// Incoming data discarded because the server holds newer state
    pub fn conflicted(id: Uuid, reason: impl Into<String>) -> Self {
        Self { id, success: false, error: Some(reason.into()), conflict: Some(true) }
    }

    /// Applied except for the parts listed in `reason`
    pub fn partially_conflicted(id: Uuid, reason: impl Into<String>) -> Self {
        Self { id, success: true, error: Some(reason.into()), conflict: Some(true) }
    }

    pub fn is_conflict(&self) -> bool {
        self.conflict.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub mutations: Vec<MutationEnvelope>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    pub results: Vec<MutationOutcome>,
}

/// Experiment-scoped state served for cache rehydration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub experiment: Experiment,
    pub treatment_groups: Vec<TreatmentGroup>,
    pub subjects: Vec<Subject>,
    /// Observations inside the pull window only
    pub observations: Vec<Observation>,
    pub samples: Vec<Sample>,
    pub synced_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observation(subject_id: i64, day: u32) -> ObservationInput {
        ObservationInput {
            subject_id,
            observation_date: NaiveDate::from_ymd_opt(2024, 2, day).unwrap(),
            weight: Some(18.0),
            stool_score: None,
            behavior_score: None,
            notes: None,
        }
    }

    #[test]
    fn test_unknown_kind_is_reported_not_dropped() {
        let err = Mutation::from_parts("deleteEverything", json!({})).unwrap_err();
        assert!(err.to_string().contains("unknown mutation type: deleteEverything"));
    }

    #[test]
    fn test_envelope_carries_kind_tag_and_payload() {
        let mutation = Mutation::CreateObservation(observation(7, 1));
        let ts = Utc::now();
        let envelope = MutationEnvelope::new(Uuid::new_v4(), &mutation, ts).unwrap();
        let wire = serde_json::to_value(&envelope).unwrap();

        assert_eq!(wire["kind"], "createObservation");
        assert_eq!(wire["payload"]["subject_id"], 7);
        assert_eq!(wire["payload"]["observation_date"], "2024-02-01");
        assert!(wire["clientTimestamp"].is_string());
        assert_eq!(Mutation::from_envelope(&envelope).unwrap(), mutation);
    }

    #[test]
    fn test_exit_payload_decodes_with_final_observation() {
        let payload = json!({
            "subject_id": 7,
            "exit_date": "2024-02-02",
            "exit_type": "natural_death",
            "final_observation": {"subject_id": 7, "observation_date": "2024-02-02", "weight": 16.5}
        });
        match Mutation::from_parts("recordExit", payload).unwrap() {
            Mutation::RecordExit(exit) => {
                assert_eq!(exit.exit_type, ExitType::NaturalDeath);
                assert_eq!(exit.final_observation.unwrap().weight, Some(16.5));
            }
            other => panic!("unexpected mutation {:?}", other),
        }
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        let result = Mutation::from_parts("createObservation", json!({"weight": 18.0}));
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_validation_rejects_bad_inputs() {
        let mut negative_weight = observation(7, 1);
        negative_weight.weight = Some(-1.0);
        assert!(Mutation::CreateObservation(negative_weight).validate().is_err());

        let empty = Mutation::CreateSamplesBatch(SamplesBatch { samples: vec![] });
        assert!(empty.validate().is_err());

        let duplicate = Mutation::CreateObservationsBatch(ObservationsBatch {
            observations: vec![observation(7, 1), observation(7, 1)],
        });
        assert!(duplicate.validate().is_err());

        let foreign_final = Mutation::RecordExit(ExitInput {
            subject_id: 7,
            exit_date: NaiveDate::from_ymd_opt(2024, 2, 2).unwrap(),
            exit_type: ExitType::NaturalDeath,
            exit_reason: None,
            final_observation: Some(observation(8, 2)),
        });
        assert!(foreign_final.validate().is_err());
    }

    #[test]
    fn test_outcome_omits_absent_fields() {
        let wire = serde_json::to_value(MutationOutcome::applied(Uuid::nil())).unwrap();
        assert_eq!(wire["success"], true);
        assert!(wire.get("error").is_none());
        assert!(wire.get("conflict").is_none());

        let conflicted = MutationOutcome::conflicted(Uuid::nil(), "newer row");
        assert!(conflicted.is_conflict());
        assert!(!conflicted.success);
    }

    #[test]
    fn test_subject_ids_are_deduplicated() {
        let batch = Mutation::CreateObservationsBatch(ObservationsBatch {
            observations: vec![observation(9, 1), observation(7, 2), observation(9, 3)],
        });
        assert_eq!(batch.subject_ids(), vec![7, 9]);
    }
}
