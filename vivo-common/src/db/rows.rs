//! Row mappers
//!
//! The server store and the field cache use identical column names for the
//! study entities, so one mapper per entity serves both. Dates are stored as
//! `YYYY-MM-DD` text, timestamps as RFC 3339 text, enums as their snake_case
//! names.

use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::derived::DerivedFields;
use crate::models::{Experiment, Observation, Sample, Subject, TreatmentGroup};
use crate::time::parse_timestamp;
use crate::Result;

/// Column list matching [`experiment_from_row`]
pub const EXPERIMENT_COLUMNS: &str = "id, name, start_date, baseline_day_offset, \
     weight_loss_endpoint_pct, css_endpoint_threshold, css_endpoint_operator, created_at, updated_at";

/// Column list matching [`treatment_group_from_row`]
pub const TREATMENT_GROUP_COLUMNS: &str = "id, experiment_id, name, description";

/// Column list matching [`subject_from_row`]
pub const SUBJECT_COLUMNS: &str = "id, experiment_id, treatment_group_id, label, baseline_weight, \
     status, exit_date, exit_type, exit_reason";

/// Column list matching [`observation_from_row`]
pub const OBSERVATION_COLUMNS: &str = "id, subject_id, experiment_id, observation_date, weight, \
     stool_score, behavior_score, notes, day_of_study, weight_pct_change, weight_score, total_css, \
     created_at, updated_at";

/// Column list matching [`sample_from_row`]
pub const SAMPLE_COLUMNS: &str = "id, subject_id, experiment_id, sample_type, collection_date, \
     day_of_study, storage_location, notes, created_at";

pub fn experiment_from_row(row: &SqliteRow) -> Result<Experiment> {
    let operator: String = row.try_get("css_endpoint_operator")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Experiment {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        start_date: row.try_get::<NaiveDate, _>("start_date")?,
        baseline_day_offset: row.try_get("baseline_day_offset")?,
        weight_loss_endpoint_pct: row.try_get("weight_loss_endpoint_pct")?,
        css_endpoint_threshold: row.try_get("css_endpoint_threshold")?,
        css_endpoint_operator: operator.parse()?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub fn treatment_group_from_row(row: &SqliteRow) -> Result<TreatmentGroup> {
    Ok(TreatmentGroup {
        id: row.try_get("id")?,
        experiment_id: row.try_get("experiment_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
    })
}

pub fn subject_from_row(row: &SqliteRow) -> Result<Subject> {
    let status: String = row.try_get("status")?;
    let exit_type: Option<String> = row.try_get("exit_type")?;

    Ok(Subject {
        id: row.try_get("id")?,
        experiment_id: row.try_get("experiment_id")?,
        treatment_group_id: row.try_get("treatment_group_id")?,
        label: row.try_get("label")?,
        baseline_weight: row.try_get("baseline_weight")?,
        status: status.parse()?,
        exit_date: row.try_get::<Option<NaiveDate>, _>("exit_date")?,
        exit_type: exit_type.map(|s| s.parse()).transpose()?,
        exit_reason: row.try_get("exit_reason")?,
    })
}

pub fn observation_from_row(row: &SqliteRow) -> Result<Observation> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Observation {
        id: row.try_get("id")?,
        subject_id: row.try_get("subject_id")?,
        experiment_id: row.try_get("experiment_id")?,
        observation_date: row.try_get::<NaiveDate, _>("observation_date")?,
        weight: row.try_get("weight")?,
        stool_score: row.try_get("stool_score")?,
        behavior_score: row.try_get("behavior_score")?,
        notes: row.try_get("notes")?,
        derived: DerivedFields {
            day_of_study: row.try_get("day_of_study")?,
            weight_pct_change: row.try_get("weight_pct_change")?,
            weight_score: row.try_get("weight_score")?,
            total_css: row.try_get("total_css")?,
        },
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub fn sample_from_row(row: &SqliteRow) -> Result<Sample> {
    let created_at: String = row.try_get("created_at")?;

    Ok(Sample {
        id: row.try_get("id")?,
        subject_id: row.try_get("subject_id")?,
        experiment_id: row.try_get("experiment_id")?,
        sample_type: row.try_get("sample_type")?,
        collection_date: row.try_get::<NaiveDate, _>("collection_date")?,
        day_of_study: row.try_get("day_of_study")?,
        storage_location: row.try_get("storage_location")?,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp(&created_at)?,
    })
}
