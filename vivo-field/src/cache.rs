//! Local cache of server state
//!
//! Holds the last pulled snapshot of each experiment plus the optimistic
//! effect of every mutation still waiting in the queue. A pull replaces an
//! experiment's cached rows wholesale and then re-applies that experiment's
//! pending mutations, so unconfirmed local writes stay visible.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use vivo_common::db::rows::{
    experiment_from_row, observation_from_row, sample_from_row, subject_from_row, treatment_group_from_row,
    EXPERIMENT_COLUMNS, OBSERVATION_COLUMNS, SAMPLE_COLUMNS, SUBJECT_COLUMNS, TREATMENT_GROUP_COLUMNS,
};
use vivo_common::derived::{compute_derived_fields, day_of_study, latched_baseline, DerivationConfig};
use vivo_common::models::{Experiment, Observation, Sample, Subject, TreatmentGroup};
use vivo_common::time::{format_timestamp, parse_timestamp};
use vivo_common::wire::{ExitInput, Mutation, ObservationInput, SampleInput, Snapshot};
use vivo_common::Result;

use crate::queue;

/// Pull bookkeeping for one cached experiment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncMeta {
    pub experiment_id: i64,
    pub last_pull_at: Option<DateTime<Utc>>,
    pub subject_count: i64,
}

#[derive(Clone)]
pub struct LocalCache {
    pool: SqlitePool,
}

impl LocalCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Replace everything cached for the snapshot's experiment
    ///
    /// Runs in one transaction; pending queue items for the experiment are
    /// re-applied on top of the fresh server rows before commit.
    pub async fn replace_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let experiment_id = snapshot.experiment.id;
        let mut tx = self.pool.begin().await?;

        for table in ["observations", "samples", "subjects", "treatment_groups"] {
            sqlx::query(&format!("DELETE FROM {} WHERE experiment_id = ?", table))
                .bind(experiment_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM experiments WHERE id = ?")
            .bind(experiment_id)
            .execute(&mut *tx)
            .await?;

        insert_experiment(&mut tx, &snapshot.experiment).await?;
        for group in &snapshot.treatment_groups {
            insert_treatment_group(&mut tx, group).await?;
        }
        for subject in &snapshot.subjects {
            insert_subject(&mut tx, subject).await?;
        }
        for observation in &snapshot.observations {
            insert_observation(&mut tx, observation).await?;
        }
        for sample in &snapshot.samples {
            insert_sample(&mut tx, sample).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO sync_meta (experiment_id, last_pull_at, subject_count)
            VALUES (?, ?, ?)
            ON CONFLICT (experiment_id) DO UPDATE SET
                last_pull_at = excluded.last_pull_at,
                subject_count = excluded.subject_count
            "#,
        )
        .bind(experiment_id)
        .bind(format_timestamp(&snapshot.synced_at))
        .bind(snapshot.subjects.len() as i64)
        .execute(&mut *tx)
        .await?;

        let pending = queue::pending_for_experiment(&mut tx, experiment_id).await?;
        let reapplied = pending.len();
        for item in pending {
            match item.mutation() {
                Ok(mutation) => apply_optimistic(&mut tx, &mutation, experiment_id, item.client_timestamp).await?,
                Err(e) => warn!(mutation_id = %item.id, error = %e, "Queued mutation no longer decodes, not re-applied"),
            }
        }

        tx.commit().await?;

        info!(
            experiment_id,
            subjects = snapshot.subjects.len(),
            observations = snapshot.observations.len(),
            samples = snapshot.samples.len(),
            reapplied,
            "Snapshot cached"
        );
        Ok(())
    }

    pub async fn experiment(&self, experiment_id: i64) -> Result<Option<Experiment>> {
        let mut conn = self.pool.acquire().await?;
        load_experiment(&mut conn, experiment_id).await
    }

    pub async fn experiments(&self) -> Result<Vec<Experiment>> {
        let rows = sqlx::query(&format!("SELECT {} FROM experiments ORDER BY id", EXPERIMENT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(experiment_from_row).collect()
    }

    pub async fn treatment_groups(&self, experiment_id: i64) -> Result<Vec<TreatmentGroup>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM treatment_groups WHERE experiment_id = ? ORDER BY id",
            TREATMENT_GROUP_COLUMNS
        ))
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(treatment_group_from_row).collect()
    }

    pub async fn subjects(&self, experiment_id: i64) -> Result<Vec<Subject>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM subjects WHERE experiment_id = ? ORDER BY label",
            SUBJECT_COLUMNS
        ))
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(subject_from_row).collect()
    }

    pub async fn subject(&self, subject_id: i64) -> Result<Option<Subject>> {
        let mut conn = self.pool.acquire().await?;
        load_subject(&mut conn, subject_id).await
    }

    pub async fn observations_for_subject(&self, subject_id: i64) -> Result<Vec<Observation>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM observations WHERE subject_id = ? ORDER BY observation_date",
            OBSERVATION_COLUMNS
        ))
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(observation_from_row).collect()
    }

    pub async fn observations_for_experiment(&self, experiment_id: i64) -> Result<Vec<Observation>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM observations WHERE experiment_id = ? ORDER BY observation_date, subject_id",
            OBSERVATION_COLUMNS
        ))
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(observation_from_row).collect()
    }

    pub async fn samples(&self, experiment_id: i64) -> Result<Vec<Sample>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM samples WHERE experiment_id = ? ORDER BY collection_date, id",
            SAMPLE_COLUMNS
        ))
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(sample_from_row).collect()
    }

    pub async fn sync_meta(&self, experiment_id: i64) -> Result<Option<SyncMeta>> {
        let row = sqlx::query("SELECT experiment_id, last_pull_at, subject_count FROM sync_meta WHERE experiment_id = ?")
            .bind(experiment_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(sync_meta_from_row).transpose()
    }

    pub async fn all_sync_meta(&self) -> Result<Vec<SyncMeta>> {
        let rows = sqlx::query("SELECT experiment_id, last_pull_at, subject_count FROM sync_meta ORDER BY experiment_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(sync_meta_from_row).collect()
    }
}

fn sync_meta_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SyncMeta> {
    let last_pull_at: Option<String> = row.try_get("last_pull_at")?;
    Ok(SyncMeta {
        experiment_id: row.try_get("experiment_id")?,
        last_pull_at: last_pull_at.as_deref().map(parse_timestamp).transpose()?,
        subject_count: row.try_get("subject_count")?,
    })
}

async fn load_experiment(conn: &mut SqliteConnection, experiment_id: i64) -> Result<Option<Experiment>> {
    let row = sqlx::query(&format!("SELECT {} FROM experiments WHERE id = ?", EXPERIMENT_COLUMNS))
        .bind(experiment_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(experiment_from_row).transpose()
}

async fn load_subject(conn: &mut SqliteConnection, subject_id: i64) -> Result<Option<Subject>> {
    let row = sqlx::query(&format!("SELECT {} FROM subjects WHERE id = ?", SUBJECT_COLUMNS))
        .bind(subject_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(subject_from_row).transpose()
}

/// Next id for a locally written row: one below the smallest id in use,
/// never above -1
async fn next_local_id(conn: &mut SqliteConnection, table: &str) -> Result<i64> {
    let min: i64 = sqlx::query_scalar(&format!("SELECT COALESCE(MIN(id), 0) FROM {}", table))
        .fetch_one(&mut *conn)
        .await?;
    Ok(min.min(0) - 1)
}

/// Apply a mutation's expected effect to the cache
///
/// Mirrors what the server does with it: observations are upserted on their
/// natural key with derived fields and the baseline latch, exits only touch
/// subjects that are still alive. Mutations for an experiment that is not
/// cached are queued without a local effect.
pub(crate) async fn apply_optimistic(
    conn: &mut SqliteConnection,
    mutation: &Mutation,
    experiment_id: i64,
    at: DateTime<Utc>,
) -> Result<()> {
    let Some(experiment) = load_experiment(conn, experiment_id).await? else {
        debug!(experiment_id, "Experiment not cached, no optimistic write");
        return Ok(());
    };

    match mutation {
        Mutation::CreateObservation(input) => write_observation(conn, &experiment, input, at).await,
        Mutation::CreateObservationsBatch(batch) => {
            for input in &batch.observations {
                write_observation(conn, &experiment, input, at).await?;
            }
            Ok(())
        }
        Mutation::RecordExit(exit) => write_exit(conn, &experiment, exit, at).await,
        Mutation::CreateSamplesBatch(batch) => {
            for input in &batch.samples {
                write_sample(conn, &experiment, input, at).await?;
            }
            Ok(())
        }
    }
}

/// Refresh cached rows of one subject that were derived under a different baseline
async fn rederive_subject(
    conn: &mut SqliteConnection,
    subject_id: i64,
    baseline_weight: Option<f64>,
    config: &DerivationConfig,
) -> Result<()> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM observations WHERE subject_id = ?",
        OBSERVATION_COLUMNS
    ))
    .bind(subject_id)
    .fetch_all(&mut *conn)
    .await?;

    for row in &rows {
        let observation = observation_from_row(row)?;
        let derived = compute_derived_fields(&observation.raw(), baseline_weight, config);
        if derived == observation.derived {
            continue;
        }
        sqlx::query(
            "UPDATE observations SET day_of_study = ?, weight_pct_change = ?, weight_score = ?, total_css = ? WHERE id = ?",
        )
        .bind(derived.day_of_study)
        .bind(derived.weight_pct_change)
        .bind(derived.weight_score)
        .bind(derived.total_css)
        .bind(observation.id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn write_observation(
    conn: &mut SqliteConnection,
    experiment: &Experiment,
    input: &ObservationInput,
    at: DateTime<Utc>,
) -> Result<()> {
    let config = experiment.derivation_config();
    let raw = input.raw();

    let mut baseline = load_subject(conn, input.subject_id)
        .await?
        .and_then(|subject| subject.baseline_weight);
    if let Some(latched) = latched_baseline(&raw, baseline, &config) {
        sqlx::query("UPDATE subjects SET baseline_weight = ? WHERE id = ?")
            .bind(latched)
            .bind(input.subject_id)
            .execute(&mut *conn)
            .await?;
        baseline = Some(latched);
        rederive_subject(conn, input.subject_id, baseline, &config).await?;
    }

    let derived = compute_derived_fields(&raw, baseline, &config);
    let id = next_local_id(conn, "observations").await?;
    let at = format_timestamp(&at);

    sqlx::query(
        r#"
        INSERT INTO observations (
            id, subject_id, experiment_id, observation_date, weight, stool_score, behavior_score,
            notes, day_of_study, weight_pct_change, weight_score, total_css, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
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
        "#,
    )
    .bind(id)
    .bind(input.subject_id)
    .bind(experiment.id)
    .bind(input.observation_date)
    .bind(input.weight)
    .bind(input.stool_score)
    .bind(input.behavior_score)
    .bind(&input.notes)
    .bind(derived.day_of_study)
    .bind(derived.weight_pct_change)
    .bind(derived.weight_score)
    .bind(derived.total_css)
    .bind(&at)
    .bind(&at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn write_exit(
    conn: &mut SqliteConnection,
    experiment: &Experiment,
    exit: &ExitInput,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE subjects
        SET status = ?, exit_date = ?, exit_type = ?, exit_reason = ?
        WHERE id = ? AND status = 'alive'
        "#,
    )
    .bind(exit.exit_type.resulting_status().as_str())
    .bind(exit.exit_date)
    .bind(exit.exit_type.as_str())
    .bind(&exit.exit_reason)
    .bind(exit.subject_id)
    .execute(&mut *conn)
    .await?;

    if let Some(observation) = &exit.final_observation {
        write_observation(conn, experiment, observation, at).await?;
    }
    Ok(())
}

async fn write_sample(
    conn: &mut SqliteConnection,
    experiment: &Experiment,
    input: &SampleInput,
    at: DateTime<Utc>,
) -> Result<()> {
    let id = next_local_id(conn, "samples").await?;
    sqlx::query(
        r#"
        INSERT INTO samples (
            id, subject_id, experiment_id, sample_type, collection_date, day_of_study,
            storage_location, notes, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(input.subject_id)
    .bind(experiment.id)
    .bind(&input.sample_type)
    .bind(input.collection_date)
    .bind(day_of_study(input.collection_date, experiment.start_date))
    .bind(&input.storage_location)
    .bind(&input.notes)
    .bind(format_timestamp(&at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_experiment(conn: &mut SqliteConnection, experiment: &Experiment) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO experiments ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        EXPERIMENT_COLUMNS
    ))
    .bind(experiment.id)
    .bind(&experiment.name)
    .bind(experiment.start_date)
    .bind(experiment.baseline_day_offset)
    .bind(experiment.weight_loss_endpoint_pct)
    .bind(experiment.css_endpoint_threshold)
    .bind(experiment.css_endpoint_operator.as_str())
    .bind(format_timestamp(&experiment.created_at))
    .bind(format_timestamp(&experiment.updated_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_treatment_group(conn: &mut SqliteConnection, group: &TreatmentGroup) -> Result<()> {
    sqlx::query(&format!("INSERT INTO treatment_groups ({}) VALUES (?, ?, ?, ?)", TREATMENT_GROUP_COLUMNS))
        .bind(group.id)
        .bind(group.experiment_id)
        .bind(&group.name)
        .bind(&group.description)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn insert_subject(conn: &mut SqliteConnection, subject: &Subject) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO subjects ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        SUBJECT_COLUMNS
    ))
    .bind(subject.id)
    .bind(subject.experiment_id)
    .bind(subject.treatment_group_id)
    .bind(&subject.label)
    .bind(subject.baseline_weight)
    .bind(subject.status.as_str())
    .bind(subject.exit_date)
    .bind(subject.exit_type.map(|t| t.as_str()))
    .bind(&subject.exit_reason)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_observation(conn: &mut SqliteConnection, observation: &Observation) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO observations ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        OBSERVATION_COLUMNS
    ))
    .bind(observation.id)
    .bind(observation.subject_id)
    .bind(observation.experiment_id)
    .bind(observation.observation_date)
    .bind(observation.weight)
    .bind(observation.stool_score)
    .bind(observation.behavior_score)
    .bind(&observation.notes)
    .bind(observation.derived.day_of_study)
    .bind(observation.derived.weight_pct_change)
    .bind(observation.derived.weight_score)
    .bind(observation.derived.total_css)
    .bind(format_timestamp(&observation.created_at))
    .bind(format_timestamp(&observation.updated_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_sample(conn: &mut SqliteConnection, sample: &Sample) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO samples ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        SAMPLE_COLUMNS
    ))
    .bind(sample.id)
    .bind(sample.subject_id)
    .bind(sample.experiment_id)
    .bind(&sample.sample_type)
    .bind(sample.collection_date)
    .bind(sample.day_of_study)
    .bind(&sample.storage_location)
    .bind(&sample.notes)
    .bind(format_timestamp(&sample.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}
