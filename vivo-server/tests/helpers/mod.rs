//! Shared fixtures for vivo-server integration tests

#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;
use vivo_common::models::{CssOperator, Experiment, Subject, TreatmentGroup};
use vivo_common::wire::{Mutation, MutationEnvelope, ObservationInput};
use vivo_server::db::experiments::{self, NewExperiment};
use vivo_server::db::subjects::{self, NewSubject};
use vivo_server::db::treatment_groups;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Client timestamp at `hour` o'clock on 2024-03-01
pub fn ts(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
}

pub async fn setup_pool() -> SqlitePool {
    vivo_server::db::init_memory_pool()
        .await
        .expect("Should create in-memory database")
}

pub async fn seed_experiment(pool: &SqlitePool, start_date: NaiveDate, baseline_day_offset: i64) -> Experiment {
    let mut conn = pool.acquire().await.unwrap();
    experiments::insert(
        &mut conn,
        &NewExperiment {
            name: "DSS colitis".to_string(),
            start_date,
            baseline_day_offset,
            weight_loss_endpoint_pct: Some(20.0),
            css_endpoint_threshold: Some(7),
            css_endpoint_operator: CssOperator::AtLeast,
        },
        Utc::now(),
    )
    .await
    .unwrap()
}

pub async fn seed_group(pool: &SqlitePool, experiment_id: i64, name: &str) -> TreatmentGroup {
    let mut conn = pool.acquire().await.unwrap();
    treatment_groups::insert(&mut conn, experiment_id, name, None)
        .await
        .unwrap()
}

pub async fn seed_subject(pool: &SqlitePool, experiment_id: i64, label: &str, group: Option<i64>) -> Subject {
    let mut conn = pool.acquire().await.unwrap();
    subjects::insert(
        &mut conn,
        experiment_id,
        &NewSubject {
            label: label.to_string(),
            treatment_group_id: group,
        },
    )
    .await
    .unwrap()
}

pub async fn load_subject(pool: &SqlitePool, id: i64) -> Subject {
    let mut conn = pool.acquire().await.unwrap();
    subjects::require(&mut conn, id).await.unwrap()
}

pub async fn load_observation(
    pool: &SqlitePool,
    subject_id: i64,
    on: NaiveDate,
) -> Option<vivo_common::models::Observation> {
    let mut conn = pool.acquire().await.unwrap();
    vivo_server::db::observations::find_by_natural_key(&mut conn, subject_id, on)
        .await
        .unwrap()
}

pub fn observation(
    subject_id: i64,
    on: NaiveDate,
    weight: Option<f64>,
    stool: Option<i64>,
    behavior: Option<i64>,
) -> ObservationInput {
    ObservationInput {
        subject_id,
        observation_date: on,
        weight,
        stool_score: stool,
        behavior_score: behavior,
        notes: None,
    }
}

pub fn envelope(mutation: Mutation, client_timestamp: DateTime<Utc>) -> MutationEnvelope {
    MutationEnvelope::new(Uuid::new_v4(), &mutation, client_timestamp).unwrap()
}
