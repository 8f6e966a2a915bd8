//! Experiment snapshots for field cache rehydration

use chrono::{Duration, NaiveDate};
use sqlx::SqlitePool;
use tracing::debug;
use vivo_common::wire::Snapshot;
use vivo_common::Result;

use crate::db::{experiments, observations, samples, subjects, treatment_groups};

/// Build the snapshot of one experiment
///
/// Observations are limited to the `window_days` calendar days ending with
/// `today` inclusive, so a window of 30 reaches back to `today - 29`. Every
/// other collection is complete. All reads share one
/// transaction so the snapshot is consistent.
pub async fn load_snapshot(
    pool: &SqlitePool,
    experiment_id: i64,
    today: NaiveDate,
    window_days: i64,
) -> Result<Snapshot> {
    let mut tx = pool.begin().await?;

    let experiment = experiments::require(&mut tx, experiment_id).await?;
    let treatment_groups = treatment_groups::list_for_experiment(&mut tx, experiment_id).await?;
    let subjects = subjects::list_for_experiment(&mut tx, experiment_id).await?;
    let since = today - Duration::days((window_days - 1).max(0));
    let observations = observations::list_for_experiment_since(&mut tx, experiment_id, since).await?;
    let samples = samples::list_for_experiment(&mut tx, experiment_id).await?;

    tx.commit().await?;

    debug!(
        experiment_id,
        subjects = subjects.len(),
        observations = observations.len(),
        samples = samples.len(),
        "Snapshot loaded"
    );

    Ok(Snapshot {
        experiment,
        treatment_groups,
        subjects,
        observations,
        samples,
        synced_at: vivo_common::time::now(),
    })
}
