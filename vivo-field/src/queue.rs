//! Durable mutation queue
//!
//! Write intents recorded on the device wait here until the server confirms
//! them or resolves them as conflicts. Items survive restarts and are only
//! removed on confirmation, conflict resolution or an explicit discard.

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;
use vivo_common::time::{format_timestamp, parse_timestamp};
use vivo_common::wire::{Mutation, MutationEnvelope};
use vivo_common::{Error, Result};

use crate::cache;

const QUEUE_COLUMNS: &str = "id, kind, payload, client_timestamp, experiment_id, attempts, last_error";

/// One pending write intent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedMutation {
    pub id: Uuid,
    pub kind: String,
    pub payload: Value,
    pub client_timestamp: DateTime<Utc>,
    pub experiment_id: i64,
    /// Push attempts that ended in a plain failure
    pub attempts: i64,
    pub last_error: Option<String>,
}

impl QueuedMutation {
    /// Validate a mutation and give it a fresh id and timestamp
    ///
    /// The timestamp is cut to the microsecond precision it is stored with.
    pub fn new(mutation: &Mutation, experiment_id: i64) -> Result<Self> {
        let now = vivo_common::time::now().trunc_subsecs(6);
        Self::with_identity(Uuid::new_v4(), now, mutation, experiment_id)
    }

    pub fn with_identity(
        id: Uuid,
        client_timestamp: DateTime<Utc>,
        mutation: &Mutation,
        experiment_id: i64,
    ) -> Result<Self> {
        mutation.validate()?;
        Ok(Self {
            id,
            kind: mutation.kind().as_str().to_string(),
            payload: mutation.to_payload()?,
            client_timestamp,
            experiment_id,
            attempts: 0,
            last_error: None,
        })
    }

    pub fn mutation(&self) -> Result<Mutation> {
        Mutation::from_parts(&self.kind, self.payload.clone())
    }

    pub fn envelope(&self) -> MutationEnvelope {
        MutationEnvelope {
            id: self.id,
            kind: self.kind.clone(),
            payload: self.payload.clone(),
            client_timestamp: self.client_timestamp,
        }
    }
}

/// A mutation the server rejected in favour of its own state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConflict {
    pub id: Uuid,
    pub kind: String,
    pub experiment_id: i64,
    pub message: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

fn queued_from_row(row: &SqliteRow) -> Result<QueuedMutation> {
    let id: String = row.try_get("id")?;
    let payload: String = row.try_get("payload")?;
    let client_timestamp: String = row.try_get("client_timestamp")?;

    Ok(QueuedMutation {
        id: Uuid::parse_str(&id).map_err(|e| Error::Internal(format!("bad queue id '{}': {}", id, e)))?,
        kind: row.try_get("kind")?,
        payload: serde_json::from_str(&payload)?,
        client_timestamp: parse_timestamp(&client_timestamp)?,
        experiment_id: row.try_get("experiment_id")?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
    })
}

async fn insert_item(conn: &mut SqliteConnection, item: &QueuedMutation) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO mutation_queue (id, kind, payload, client_timestamp, experiment_id)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(item.id.to_string())
    .bind(&item.kind)
    .bind(serde_json::to_string(&item.payload)?)
    .bind(format_timestamp(&item.client_timestamp))
    .bind(item.experiment_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Queued mutations of one experiment, oldest first
pub(crate) async fn pending_for_experiment(
    conn: &mut SqliteConnection,
    experiment_id: i64,
) -> Result<Vec<QueuedMutation>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM mutation_queue WHERE experiment_id = ? ORDER BY client_timestamp, rowid",
        QUEUE_COLUMNS
    ))
    .bind(experiment_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(queued_from_row).collect()
}

#[derive(Clone)]
pub struct MutationQueue {
    pool: SqlitePool,
}

impl MutationQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Validate and append a mutation
    pub async fn enqueue(&self, mutation: &Mutation, experiment_id: i64) -> Result<QueuedMutation> {
        let item = QueuedMutation::new(mutation, experiment_id)?;
        self.insert(&item).await?;
        Ok(item)
    }

    /// Append an already-built item; re-inserting the same id is a no-op
    pub async fn insert(&self, item: &QueuedMutation) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_item(&mut conn, item).await?;
        debug!(mutation_id = %item.id, kind = %item.kind, "Mutation queued");
        Ok(())
    }

    /// Queue a mutation and apply it to the local cache, both or neither
    pub async fn record_offline_write(&self, item: &QueuedMutation) -> Result<()> {
        let mutation = item.mutation()?;

        let mut tx = self.pool.begin().await?;
        insert_item(&mut tx, item).await?;
        cache::apply_optimistic(&mut tx, &mutation, item.experiment_id, item.client_timestamp).await?;
        tx.commit().await?;

        info!(
            mutation_id = %item.id,
            kind = %item.kind,
            experiment_id = item.experiment_id,
            "Offline write queued"
        );
        Ok(())
    }

    /// Every queued mutation, ordered by client timestamp
    pub async fn drain(&self) -> Result<Vec<QueuedMutation>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM mutation_queue ORDER BY client_timestamp, rowid",
            QUEUE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(queued_from_row).collect()
    }

    /// Remove confirmed mutations
    pub async fn remove(&self, ids: &[Uuid]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for id in ids {
            removed += sqlx::query("DELETE FROM mutation_queue WHERE id = ?")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    /// Keep a failed mutation queued, noting the failure
    pub async fn record_failure(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query("UPDATE mutation_queue SET attempts = attempts + 1, last_error = ? WHERE id = ?")
            .bind(error)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Log conflicts the server resolved and drop them from the queue
    pub async fn resolve_conflicts(&self, resolved: &[(QueuedMutation, Option<String>)]) -> Result<()> {
        if resolved.is_empty() {
            return Ok(());
        }

        let resolved_at = format_timestamp(&vivo_common::time::now());
        let mut tx = self.pool.begin().await?;
        for (item, message) in resolved {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO resolved_conflicts (id, kind, experiment_id, message, resolved_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(item.id.to_string())
            .bind(&item.kind)
            .bind(item.experiment_id)
            .bind(message)
            .bind(&resolved_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM mutation_queue WHERE id = ?")
                .bind(item.id.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Drop a mutation at the user's request; returns false if it was not queued
    pub async fn discard(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM mutation_queue WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        let discarded = result.rows_affected() == 1;
        if discarded {
            info!(mutation_id = %id, "Queued mutation discarded");
        }
        Ok(discarded)
    }

    pub async fn len(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM mutation_queue")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Queued mutations that have failed at least once
    pub async fn failed_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM mutation_queue WHERE attempts > 0")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Conflict log, newest first
    pub async fn conflicts(&self) -> Result<Vec<ResolvedConflict>> {
        let rows = sqlx::query(
            "SELECT id, kind, experiment_id, message, resolved_at FROM resolved_conflicts ORDER BY resolved_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                let resolved_at: String = row.try_get("resolved_at")?;
                Ok(ResolvedConflict {
                    id: Uuid::parse_str(&id)
                        .map_err(|e| Error::Internal(format!("bad conflict id '{}': {}", id, e)))?,
                    kind: row.try_get("kind")?,
                    experiment_id: row.try_get("experiment_id")?,
                    message: row.try_get("message")?,
                    resolved_at: parse_timestamp(&resolved_at)?,
                })
            })
            .collect()
    }
}
