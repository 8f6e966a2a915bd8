//! Mutation reconciliation
//!
//! A push runs inside one database transaction. Every mutation gets its own
//! savepoint: a mutation that fails rolls back to its savepoint and reports
//! `success: false`, and the mutations after it still run. Mutations that
//! reach a definite outcome are written to the applied-mutation ledger in
//! the same savepoint, so a retried push answers from the ledger.
//!
//! Observation conflicts compare the mutation's client timestamp with the
//! `created_at` of the stored row for the same subject and date. A row
//! created after the mutation was recorded wins and the mutation is
//! reported as a conflict.

use chrono::{DateTime, Utc};
use sqlx::{Connection, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use vivo_common::derived::{compute_derived_fields, day_of_study, latched_baseline};
use vivo_common::wire::{
    ExitInput, Mutation, MutationEnvelope, MutationOutcome, ObservationInput, ObservationsBatch, SamplesBatch,
};
use vivo_common::Result;

use crate::cascade;
use crate::db::{experiments, ledger, observations, samples, subjects};

/// Result of writing one observation
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationWrite {
    /// Inserted or replaced; carries the row id
    Written(i64),
    /// Discarded because the stored row is newer
    Conflict(String),
}

/// Apply a batch of mutations in order and report one outcome per mutation
///
/// Errors only when the transaction itself cannot be opened or committed.
pub async fn push(pool: &SqlitePool, envelopes: &[MutationEnvelope]) -> Result<Vec<MutationOutcome>> {
    let mut tx = pool.begin().await?;
    let mut results = Vec::with_capacity(envelopes.len());

    for envelope in envelopes {
        results.push(apply_envelope(&mut tx, envelope).await?);
    }

    tx.commit().await?;

    let succeeded = results.iter().filter(|r| r.success).count();
    let conflicts = results.iter().filter(|r| r.is_conflict()).count();
    let failed = results.iter().filter(|r| !r.success && !r.is_conflict()).count();
    info!(total = results.len(), succeeded, conflicts, failed, "Push reconciled");

    Ok(results)
}

/// Apply one envelope inside its own savepoint
async fn apply_envelope(conn: &mut SqliteConnection, envelope: &MutationEnvelope) -> Result<MutationOutcome> {
    if let Some(outcome) = ledger::find(conn, envelope.id).await? {
        debug!(mutation_id = %envelope.id, "Mutation already applied, returning recorded outcome");
        return Ok(outcome);
    }

    let mut savepoint = conn.begin().await?;

    match apply_and_record(&mut savepoint, envelope).await {
        Ok(outcome) => {
            savepoint.commit().await?;
            if outcome.is_conflict() {
                info!(
                    mutation_id = %envelope.id,
                    kind = %envelope.kind,
                    reason = outcome.error.as_deref().unwrap_or(""),
                    "Mutation conflicted, server state kept"
                );
            }
            Ok(outcome)
        }
        Err(err) => {
            savepoint.rollback().await?;
            warn!(mutation_id = %envelope.id, kind = %envelope.kind, error = %err, "Mutation failed");
            Ok(MutationOutcome::failed(envelope.id, err.to_string()))
        }
    }
}

async fn apply_and_record(conn: &mut SqliteConnection, envelope: &MutationEnvelope) -> Result<MutationOutcome> {
    let now = vivo_common::time::now();
    let mutation = Mutation::from_envelope(envelope)?;
    mutation.validate()?;

    let outcome = apply_mutation(conn, envelope, &mutation, now).await?;
    ledger::record(conn, &envelope.kind, &outcome, envelope.client_timestamp, now).await?;

    Ok(outcome)
}

async fn apply_mutation(
    conn: &mut SqliteConnection,
    envelope: &MutationEnvelope,
    mutation: &Mutation,
    now: DateTime<Utc>,
) -> Result<MutationOutcome> {
    let id = envelope.id;
    let client_ts = envelope.client_timestamp;

    match mutation {
        Mutation::CreateObservation(input) => match write_observation(conn, input, client_ts, now).await? {
            ObservationWrite::Written(_) => Ok(MutationOutcome::applied(id)),
            ObservationWrite::Conflict(reason) => Ok(MutationOutcome::conflicted(id, reason)),
        },
        Mutation::CreateObservationsBatch(batch) => apply_observations_batch(conn, id, batch, client_ts, now).await,
        Mutation::RecordExit(exit) => apply_exit(conn, id, exit, client_ts, now).await,
        Mutation::CreateSamplesBatch(batch) => {
            insert_samples(conn, batch, now).await?;
            Ok(MutationOutcome::applied(id))
        }
    }
}

/// Write one observation through the conflict check, baseline latch and
/// derived-field calculation
///
/// A new row takes the client timestamp as its `created_at`.
pub async fn write_observation(
    conn: &mut SqliteConnection,
    input: &ObservationInput,
    client_ts: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<ObservationWrite> {
    let subject = subjects::require(conn, input.subject_id).await?;
    let experiment = experiments::require(conn, subject.experiment_id).await?;

    if let Some(existing) = observations::find_by_natural_key(conn, input.subject_id, input.observation_date).await? {
        if existing.created_at > client_ts {
            return Ok(ObservationWrite::Conflict(format!(
                "observation for subject {} on {} was created after this change",
                input.subject_id, input.observation_date
            )));
        }
    }

    let config = experiment.derivation_config();
    let raw = input.raw();

    let mut baseline = subject.baseline_weight;
    if let Some(latched) = latched_baseline(&raw, baseline, &config) {
        subjects::set_baseline_weight(conn, subject.id, Some(latched)).await?;
        baseline = Some(latched);

        // Rows stored before the baseline existed were derived without it
        let history = observations::list_for_subject(conn, subject.id).await?;
        let rederived = cascade::rederive_observations(conn, &history, baseline, &config).await?;
        debug!(
            subject_id = subject.id,
            baseline_weight = latched,
            rederived,
            "Baseline weight latched"
        );
    }

    let derived = compute_derived_fields(&raw, baseline, &config);
    let row_id = observations::upsert(conn, experiment.id, input, &derived, client_ts, now).await?;

    Ok(ObservationWrite::Written(row_id))
}

async fn apply_observations_batch(
    conn: &mut SqliteConnection,
    id: uuid::Uuid,
    batch: &ObservationsBatch,
    client_ts: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<MutationOutcome> {
    let mut skipped = Vec::new();

    for input in &batch.observations {
        if let ObservationWrite::Conflict(_) = write_observation(conn, input, client_ts, now).await? {
            skipped.push(format!("subject {} on {}", input.subject_id, input.observation_date));
        }
    }

    if skipped.is_empty() {
        Ok(MutationOutcome::applied(id))
    } else if skipped.len() == batch.observations.len() {
        Ok(MutationOutcome::conflicted(
            id,
            format!("all observations superseded by newer rows: {}", skipped.join(", ")),
        ))
    } else {
        Ok(MutationOutcome::partially_conflicted(
            id,
            format!("skipped observations superseded by newer rows: {}", skipped.join(", ")),
        ))
    }
}

async fn apply_exit(
    conn: &mut SqliteConnection,
    id: uuid::Uuid,
    exit: &ExitInput,
    client_ts: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<MutationOutcome> {
    let subject = subjects::require(conn, exit.subject_id).await?;

    if subject.status.is_terminal() {
        return Ok(MutationOutcome::conflicted(
            id,
            format!("subject {} already exited as {}", subject.id, subject.status),
        ));
    }

    let exited = subjects::record_exit(
        conn,
        subject.id,
        exit.exit_date,
        exit.exit_type,
        exit.exit_reason.as_deref(),
    )
    .await?;
    if !exited {
        return Ok(MutationOutcome::conflicted(id, format!("subject {} already exited", subject.id)));
    }

    if let Some(final_observation) = &exit.final_observation {
        if let ObservationWrite::Conflict(reason) = write_observation(conn, final_observation, client_ts, now).await? {
            return Ok(MutationOutcome::partially_conflicted(
                id,
                format!("exit recorded; final {}", reason),
            ));
        }
    }

    Ok(MutationOutcome::applied(id))
}

async fn insert_samples(conn: &mut SqliteConnection, batch: &SamplesBatch, now: DateTime<Utc>) -> Result<()> {
    for input in &batch.samples {
        let subject = subjects::require(conn, input.subject_id).await?;
        let experiment = experiments::require(conn, subject.experiment_id).await?;
        let day = day_of_study(input.collection_date, experiment.start_date);
        samples::insert(conn, experiment.id, input, day, now).await?;
    }
    Ok(())
}
