//! Observation queries
//!
//! `(subject_id, observation_date)` is the natural key. A write for an
//! existing key replaces every raw and derived field; only `created_at`
//! survives from the earlier row.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqliteConnection;
use vivo_common::db::rows::{observation_from_row, OBSERVATION_COLUMNS};
use vivo_common::derived::DerivedFields;
use vivo_common::models::Observation;
use vivo_common::time::format_timestamp;
use vivo_common::wire::ObservationInput;
use vivo_common::Result;

pub async fn find_by_natural_key(
    conn: &mut SqliteConnection,
    subject_id: i64,
    observation_date: NaiveDate,
) -> Result<Option<Observation>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM observations WHERE subject_id = ? AND observation_date = ?",
        OBSERVATION_COLUMNS
    ))
    .bind(subject_id)
    .bind(observation_date)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(observation_from_row).transpose()
}

/// Insert or replace the observation for `(subject_id, observation_date)`
///
/// `created_at` applies only when the row is new; `updated_at` is always
/// refreshed. Returns the row id.
pub async fn upsert(
    conn: &mut SqliteConnection,
    experiment_id: i64,
    input: &ObservationInput,
    derived: &DerivedFields,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO observations (
            subject_id, experiment_id, observation_date, weight, stool_score, behavior_score,
            notes, day_of_study, weight_pct_change, weight_score, total_css, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (subject_id, observation_date) DO UPDATE SET
            weight = excluded.weight,
            stool_score = excluded.stool_score,
            behavior_score = excluded.behavior_score,
            notes = excluded.notes,
            day_of_study = excluded.day_of_study,
            weight_pct_change = excluded.weight_pct_change,
            weight_score = excluded.weight_score,
            total_css = excluded.total_css,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(input.subject_id)
    .bind(experiment_id)
    .bind(input.observation_date)
    .bind(input.weight)
    .bind(input.stool_score)
    .bind(input.behavior_score)
    .bind(&input.notes)
    .bind(derived.day_of_study)
    .bind(derived.weight_pct_change)
    .bind(derived.weight_score)
    .bind(derived.total_css)
    .bind(format_timestamp(&created_at))
    .bind(format_timestamp(&now))
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

/// All observations of a subject, oldest first
pub async fn list_for_subject(conn: &mut SqliteConnection, subject_id: i64) -> Result<Vec<Observation>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM observations WHERE subject_id = ? ORDER BY observation_date",
        OBSERVATION_COLUMNS
    ))
    .bind(subject_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(observation_from_row).collect()
}

/// Observations of an experiment dated on or after `since`
pub async fn list_for_experiment_since(
    conn: &mut SqliteConnection,
    experiment_id: i64,
    since: NaiveDate,
) -> Result<Vec<Observation>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM observations WHERE experiment_id = ? AND observation_date >= ? \
         ORDER BY observation_date, subject_id",
        OBSERVATION_COLUMNS
    ))
    .bind(experiment_id)
    .bind(since)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(observation_from_row).collect()
}

/// Overwrite the derived fields of one observation in place
pub async fn update_derived(conn: &mut SqliteConnection, id: i64, derived: &DerivedFields) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE observations
        SET day_of_study = ?, weight_pct_change = ?, weight_score = ?, total_css = ?
        WHERE id = ?
        "#,
    )
    .bind(derived.day_of_study)
    .bind(derived.weight_pct_change)
    .bind(derived.weight_score)
    .bind(derived.total_css)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Latest observation of every alive subject in the experiment
pub async fn latest_for_alive_subjects(conn: &mut SqliteConnection, experiment_id: i64) -> Result<Vec<Observation>> {
    let rows = sqlx::query(
        r#"
        SELECT o.id, o.subject_id, o.experiment_id, o.observation_date, o.weight,
               o.stool_score, o.behavior_score, o.notes, o.day_of_study, o.weight_pct_change,
               o.weight_score, o.total_css, o.created_at, o.updated_at
        FROM observations o
        JOIN subjects s ON s.id = o.subject_id
        WHERE o.experiment_id = ?
          AND s.status = 'alive'
          AND o.observation_date = (
              SELECT MAX(latest.observation_date) FROM observations latest
              WHERE latest.subject_id = o.subject_id
          )
        ORDER BY o.subject_id
        "#,
    )
    .bind(experiment_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(observation_from_row).collect()
}
