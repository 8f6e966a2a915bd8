//! Treatment group queries

use sqlx::SqliteConnection;
use vivo_common::db::rows::{treatment_group_from_row, TREATMENT_GROUP_COLUMNS};
use vivo_common::models::TreatmentGroup;
use vivo_common::{Error, Result};

pub async fn insert(
    conn: &mut SqliteConnection,
    experiment_id: i64,
    name: &str,
    description: Option<&str>,
) -> Result<TreatmentGroup> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("treatment group name is required".to_string()));
    }

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO treatment_groups (experiment_id, name, description) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(experiment_id)
    .bind(name.trim())
    .bind(description)
    .fetch_one(&mut *conn)
    .await?;

    Ok(TreatmentGroup {
        id,
        experiment_id,
        name: name.trim().to_string(),
        description: description.map(str::to_string),
    })
}

pub async fn get(conn: &mut SqliteConnection, id: i64) -> Result<Option<TreatmentGroup>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM treatment_groups WHERE id = ?",
        TREATMENT_GROUP_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(treatment_group_from_row).transpose()
}

pub async fn list_for_experiment(conn: &mut SqliteConnection, experiment_id: i64) -> Result<Vec<TreatmentGroup>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM treatment_groups WHERE experiment_id = ? ORDER BY id",
        TREATMENT_GROUP_COLUMNS
    ))
    .bind(experiment_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(treatment_group_from_row).collect()
}
