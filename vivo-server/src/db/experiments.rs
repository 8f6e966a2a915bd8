//! Experiment queries

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use sqlx::SqliteConnection;
use vivo_common::db::rows::{experiment_from_row, EXPERIMENT_COLUMNS};
use vivo_common::models::{CssOperator, Experiment};
use vivo_common::time::format_timestamp;
use vivo_common::{Error, Result};

/// Fields accepted when creating an experiment
#[derive(Debug, Clone, Deserialize)]
pub struct NewExperiment {
    pub name: String,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub baseline_day_offset: i64,
    #[serde(default)]
    pub weight_loss_endpoint_pct: Option<f64>,
    #[serde(default)]
    pub css_endpoint_threshold: Option<i64>,
    #[serde(default)]
    pub css_endpoint_operator: CssOperator,
}

/// Partial configuration update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExperimentUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub baseline_day_offset: Option<i64>,
    #[serde(default)]
    pub weight_loss_endpoint_pct: Option<f64>,
    #[serde(default)]
    pub css_endpoint_threshold: Option<i64>,
    #[serde(default)]
    pub css_endpoint_operator: Option<CssOperator>,
}

impl ExperimentUpdate {
    /// Whether applying this update invalidates stored derived fields
    pub fn invalidates_derived(&self, current: &Experiment) -> bool {
        self.baseline_day_offset
            .is_some_and(|offset| offset != current.baseline_day_offset)
            || self.start_date.is_some_and(|date| date != current.start_date)
    }
}

pub async fn insert(conn: &mut SqliteConnection, new: &NewExperiment, now: DateTime<Utc>) -> Result<Experiment> {
    if new.name.trim().is_empty() {
        return Err(Error::InvalidInput("experiment name is required".to_string()));
    }

    let timestamp = format_timestamp(&now);
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO experiments (
            name, start_date, baseline_day_offset, weight_loss_endpoint_pct,
            css_endpoint_threshold, css_endpoint_operator, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(new.name.trim())
    .bind(new.start_date)
    .bind(new.baseline_day_offset)
    .bind(new.weight_loss_endpoint_pct)
    .bind(new.css_endpoint_threshold)
    .bind(new.css_endpoint_operator.as_str())
    .bind(&timestamp)
    .bind(&timestamp)
    .fetch_one(&mut *conn)
    .await?;

    require(conn, id).await
}

pub async fn get(conn: &mut SqliteConnection, id: i64) -> Result<Option<Experiment>> {
    let row = sqlx::query(&format!("SELECT {} FROM experiments WHERE id = ?", EXPERIMENT_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(experiment_from_row).transpose()
}

/// Get an experiment or fail with `NotFound`
pub async fn require(conn: &mut SqliteConnection, id: i64) -> Result<Experiment> {
    get(conn, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("experiment {}", id)))
}

/// Apply a partial update and return the stored row
pub async fn update(
    conn: &mut SqliteConnection,
    id: i64,
    changes: &ExperimentUpdate,
    now: DateTime<Utc>,
) -> Result<Experiment> {
    let current = require(conn, id).await?;

    let name = match &changes.name {
        Some(name) if name.trim().is_empty() => {
            return Err(Error::InvalidInput("experiment name is required".to_string()))
        }
        Some(name) => name.trim().to_string(),
        None => current.name,
    };

    sqlx::query(
        r#"
        UPDATE experiments
        SET name = ?, start_date = ?, baseline_day_offset = ?, weight_loss_endpoint_pct = ?,
            css_endpoint_threshold = ?, css_endpoint_operator = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(name)
    .bind(changes.start_date.unwrap_or(current.start_date))
    .bind(changes.baseline_day_offset.unwrap_or(current.baseline_day_offset))
    .bind(changes.weight_loss_endpoint_pct.or(current.weight_loss_endpoint_pct))
    .bind(changes.css_endpoint_threshold.or(current.css_endpoint_threshold))
    .bind(changes.css_endpoint_operator.unwrap_or(current.css_endpoint_operator).as_str())
    .bind(format_timestamp(&now))
    .bind(id)
    .execute(&mut *conn)
    .await?;

    require(conn, id).await
}
