//! Sample queries
//!
//! Samples are append-only; the only in-place change is re-deriving
//! `day_of_study` after the experiment start date moves.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqliteConnection;
use vivo_common::db::rows::{sample_from_row, SAMPLE_COLUMNS};
use vivo_common::models::Sample;
use vivo_common::time::format_timestamp;
use vivo_common::wire::SampleInput;
use vivo_common::Result;

pub async fn insert(
    conn: &mut SqliteConnection,
    experiment_id: i64,
    input: &SampleInput,
    day_of_study: i64,
    now: DateTime<Utc>,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO samples (
            subject_id, experiment_id, sample_type, collection_date, day_of_study,
            storage_location, notes, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(input.subject_id)
    .bind(experiment_id)
    .bind(input.sample_type.trim())
    .bind(input.collection_date)
    .bind(day_of_study)
    .bind(&input.storage_location)
    .bind(&input.notes)
    .bind(format_timestamp(&now))
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

pub async fn list_for_experiment(conn: &mut SqliteConnection, experiment_id: i64) -> Result<Vec<Sample>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM samples WHERE experiment_id = ? ORDER BY collection_date, id",
        SAMPLE_COLUMNS
    ))
    .bind(experiment_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(sample_from_row).collect()
}

/// Recompute every sample's study day against a new start date
///
/// Returns the number of samples whose day changed.
pub async fn rederive_days(conn: &mut SqliteConnection, experiment_id: i64, start_date: NaiveDate) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE samples
        SET day_of_study = CAST(julianday(collection_date) - julianday(?) AS INTEGER)
        WHERE experiment_id = ?
          AND day_of_study != CAST(julianday(collection_date) - julianday(?) AS INTEGER)
        "#,
    )
    .bind(start_date)
    .bind(experiment_id)
    .bind(start_date)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}
