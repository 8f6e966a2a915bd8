//! Baseline recompute cascade
//!
//! Moving an experiment's baseline day (or its start date) invalidates every
//! stored baseline weight and derived field. The cascade re-latches each
//! subject's baseline from the observation on the new baseline day and
//! re-derives every observation in place. Running it twice changes nothing
//! the second time.

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;
use vivo_common::derived::{compute_derived_fields, day_of_study, DerivationConfig};
use vivo_common::models::{Experiment, Observation};
use vivo_common::Result;

use crate::db::experiments::{self, ExperimentUpdate};
use crate::db::{observations, samples, subjects};

/// What a cascade run changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    pub experiment_id: i64,
    pub baseline_day_offset: i64,
    /// Subjects whose baseline weight changed
    pub subjects_updated: usize,
    /// Observations whose derived fields changed
    pub observations_recomputed: usize,
    /// Samples whose study day changed
    pub samples_updated: u64,
}

/// Rewrite the derived fields of `history` that differ from a fresh
/// calculation; returns how many rows changed
pub async fn rederive_observations(
    conn: &mut SqliteConnection,
    history: &[Observation],
    baseline_weight: Option<f64>,
    config: &DerivationConfig,
) -> Result<usize> {
    let mut changed = 0;
    for observation in history {
        let derived = compute_derived_fields(&observation.raw(), baseline_weight, config);
        if derived != observation.derived {
            observations::update_derived(conn, observation.id, &derived).await?;
            changed += 1;
        }
    }
    Ok(changed)
}

/// Re-latch baselines and re-derive every observation of an experiment
pub async fn recompute_experiment(conn: &mut SqliteConnection, experiment_id: i64) -> Result<CascadeReport> {
    let experiment = experiments::require(conn, experiment_id).await?;
    let config = experiment.derivation_config();

    let mut report = CascadeReport {
        experiment_id,
        baseline_day_offset: experiment.baseline_day_offset,
        ..Default::default()
    };

    for subject in subjects::list_for_experiment(conn, experiment_id).await? {
        let history = observations::list_for_subject(conn, subject.id).await?;

        let baseline = history
            .iter()
            .find(|o| day_of_study(o.observation_date, config.start_date) == config.baseline_day_offset)
            .and_then(|o| o.weight);

        if baseline != subject.baseline_weight {
            subjects::set_baseline_weight(conn, subject.id, baseline).await?;
            report.subjects_updated += 1;
        }

        report.observations_recomputed += rederive_observations(conn, &history, baseline, &config).await?;
    }

    info!(
        experiment_id,
        baseline_day_offset = report.baseline_day_offset,
        subjects_updated = report.subjects_updated,
        observations_recomputed = report.observations_recomputed,
        "Baseline cascade complete"
    );

    Ok(report)
}

/// Update an experiment's configuration, cascading when derived fields are
/// invalidated
///
/// The update and the cascade commit together.
pub async fn apply_experiment_update(
    pool: &SqlitePool,
    experiment_id: i64,
    changes: &ExperimentUpdate,
) -> Result<(Experiment, Option<CascadeReport>)> {
    let mut tx = pool.begin().await?;

    let current = experiments::require(&mut tx, experiment_id).await?;
    let invalidated = changes.invalidates_derived(&current);
    let start_moved = changes.start_date.is_some_and(|date| date != current.start_date);

    let updated = experiments::update(&mut tx, experiment_id, changes, vivo_common::time::now()).await?;

    let report = if invalidated {
        let mut report = recompute_experiment(&mut tx, experiment_id).await?;
        if start_moved {
            report.samples_updated = samples::rederive_days(&mut tx, experiment_id, updated.start_date).await?;
        }
        Some(report)
    } else {
        None
    };

    tx.commit().await?;
    Ok((updated, report))
}

/// Run the cascade on its own, in one transaction
pub async fn recompute(pool: &SqlitePool, experiment_id: i64) -> Result<CascadeReport> {
    let mut tx = pool.begin().await?;
    let report = recompute_experiment(&mut tx, experiment_id).await?;
    tx.commit().await?;
    Ok(report)
}
