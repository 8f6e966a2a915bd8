//! Device-local SQLite store
//!
//! One file per device holds the cached experiment snapshots, the mutation
//! queue, per-experiment sync metadata and the log of resolved conflicts.
//! Cached rows keep their server ids; rows written optimistically while
//! offline get negative ids until the next pull replaces them.

use sqlx::SqlitePool;
use std::path::Path;
use tracing::debug;
use vivo_common::Result;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS experiments (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        start_date TEXT NOT NULL,
        baseline_day_offset INTEGER NOT NULL DEFAULT 0,
        weight_loss_endpoint_pct REAL,
        css_endpoint_threshold INTEGER,
        css_endpoint_operator TEXT NOT NULL DEFAULT '>=',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS treatment_groups (
        id INTEGER PRIMARY KEY,
        experiment_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        description TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_treatment_groups_experiment ON treatment_groups (experiment_id)",
    r#"
    CREATE TABLE IF NOT EXISTS subjects (
        id INTEGER PRIMARY KEY,
        experiment_id INTEGER NOT NULL,
        treatment_group_id INTEGER,
        label TEXT NOT NULL,
        baseline_weight REAL,
        status TEXT NOT NULL DEFAULT 'alive',
        exit_date TEXT,
        exit_type TEXT,
        exit_reason TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_subjects_experiment ON subjects (experiment_id)",
    r#"
    CREATE TABLE IF NOT EXISTS observations (
        id INTEGER PRIMARY KEY,
        subject_id INTEGER NOT NULL,
        experiment_id INTEGER NOT NULL,
        observation_date TEXT NOT NULL,
        weight REAL,
        stool_score INTEGER,
        behavior_score INTEGER,
        notes TEXT,
        day_of_study INTEGER NOT NULL,
        weight_pct_change REAL,
        weight_score INTEGER,
        total_css INTEGER,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (subject_id, observation_date)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_observations_experiment ON observations (experiment_id, observation_date)",
    r#"
    CREATE TABLE IF NOT EXISTS samples (
        id INTEGER PRIMARY KEY,
        subject_id INTEGER NOT NULL,
        experiment_id INTEGER NOT NULL,
        sample_type TEXT NOT NULL,
        collection_date TEXT NOT NULL,
        day_of_study INTEGER NOT NULL,
        storage_location TEXT,
        notes TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_samples_experiment ON samples (experiment_id)",
    r#"
    CREATE TABLE IF NOT EXISTS mutation_queue (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        client_timestamp TEXT NOT NULL,
        experiment_id INTEGER NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_mutation_queue_timestamp ON mutation_queue (client_timestamp)",
    r#"
    CREATE TABLE IF NOT EXISTS sync_meta (
        experiment_id INTEGER PRIMARY KEY,
        last_pull_at TEXT,
        subject_count INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS resolved_conflicts (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        experiment_id INTEGER NOT NULL,
        message TEXT,
        resolved_at TEXT NOT NULL
    )
    "#,
];

/// Create any missing tables and indexes
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    debug!("Local store schema ready");
    Ok(())
}

/// Open the device store at `db_path`
pub async fn open(db_path: &Path) -> Result<SqlitePool> {
    let pool = vivo_common::db::open_pool(db_path, 4).await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// In-memory store for tests
pub async fn open_in_memory() -> Result<SqlitePool> {
    let pool = vivo_common::db::open_memory_pool().await?;
    init_schema(&pool).await?;
    Ok(pool)
}
