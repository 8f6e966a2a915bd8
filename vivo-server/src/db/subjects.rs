//! Subject queries
//!
//! Status only ever moves away from `alive`: [`record_exit`] matches on
//! `status = 'alive'` so a second exit cannot overwrite the first.

use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::SqliteConnection;
use vivo_common::db::rows::{subject_from_row, SUBJECT_COLUMNS};
use vivo_common::models::{ExitType, Subject};
use vivo_common::{Error, Result};

use super::treatment_groups;

#[derive(Debug, Clone, Deserialize)]
pub struct NewSubject {
    pub label: String,
    #[serde(default)]
    pub treatment_group_id: Option<i64>,
}

pub async fn insert(conn: &mut SqliteConnection, experiment_id: i64, new: &NewSubject) -> Result<Subject> {
    if new.label.trim().is_empty() {
        return Err(Error::InvalidInput("subject label is required".to_string()));
    }

    if let Some(group_id) = new.treatment_group_id {
        match treatment_groups::get(conn, group_id).await? {
            Some(group) if group.experiment_id == experiment_id => {}
            _ => {
                return Err(Error::InvalidInput(format!(
                    "treatment group {} does not belong to experiment {}",
                    group_id, experiment_id
                )))
            }
        }
    }

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO subjects (experiment_id, treatment_group_id, label) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(experiment_id)
    .bind(new.treatment_group_id)
    .bind(new.label.trim())
    .fetch_one(&mut *conn)
    .await?;

    require(conn, id).await
}

pub async fn get(conn: &mut SqliteConnection, id: i64) -> Result<Option<Subject>> {
    let row = sqlx::query(&format!("SELECT {} FROM subjects WHERE id = ?", SUBJECT_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(subject_from_row).transpose()
}

/// Get a subject or fail with `NotFound`
pub async fn require(conn: &mut SqliteConnection, id: i64) -> Result<Subject> {
    get(conn, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("subject {}", id)))
}

pub async fn list_for_experiment(conn: &mut SqliteConnection, experiment_id: i64) -> Result<Vec<Subject>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM subjects WHERE experiment_id = ? ORDER BY id",
        SUBJECT_COLUMNS
    ))
    .bind(experiment_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(subject_from_row).collect()
}

pub async fn set_baseline_weight(conn: &mut SqliteConnection, id: i64, baseline_weight: Option<f64>) -> Result<()> {
    sqlx::query("UPDATE subjects SET baseline_weight = ? WHERE id = ?")
        .bind(baseline_weight)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Move an alive subject to its terminal status
///
/// Returns false when the subject had already left the study; nothing is
/// written in that case.
pub async fn record_exit(
    conn: &mut SqliteConnection,
    id: i64,
    exit_date: NaiveDate,
    exit_type: ExitType,
    exit_reason: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE subjects
        SET status = ?, exit_date = ?, exit_type = ?, exit_reason = ?
        WHERE id = ? AND status = 'alive'
        "#,
    )
    .bind(exit_type.resulting_status().as_str())
    .bind(exit_date)
    .bind(exit_type.as_str())
    .bind(exit_reason)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}
