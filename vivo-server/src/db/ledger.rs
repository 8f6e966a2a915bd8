//! Applied-mutation ledger
//!
//! Every mutation that reached a definite outcome (applied or conflicted) is
//! recorded by id. A retried push looks the id up first and answers with the
//! stored outcome instead of applying the mutation again. Plain failures are
//! not recorded so the client can retry them.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;
use vivo_common::time::format_timestamp;
use vivo_common::wire::MutationOutcome;
use vivo_common::Result;

pub async fn find(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<MutationOutcome>> {
    let row = sqlx::query("SELECT success, conflict, message FROM applied_mutations WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let success: bool = row.try_get("success")?;
    let conflict: bool = row.try_get("conflict")?;
    let message: Option<String> = row.try_get("message")?;

    Ok(Some(MutationOutcome {
        id,
        success,
        error: message,
        conflict: conflict.then_some(true),
    }))
}

pub async fn record(
    conn: &mut SqliteConnection,
    kind: &str,
    outcome: &MutationOutcome,
    client_timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO applied_mutations
            (id, kind, success, conflict, message, client_timestamp, applied_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(outcome.id.to_string())
    .bind(kind)
    .bind(outcome.success)
    .bind(outcome.is_conflict())
    .bind(&outcome.error)
    .bind(format_timestamp(&client_timestamp))
    .bind(format_timestamp(&now))
    .execute(&mut *conn)
    .await?;

    Ok(())
}
