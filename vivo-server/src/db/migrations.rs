//! Database schema migrations
//!
//! Versioned, idempotent migrations tracked in the `schema_version` table.
//!
//! 1. **Never modify existing migrations** - databases in the field were
//!    created by them
//! 2. **Always add new migrations** - one function per schema change
//! 3. **Use `IF NOT EXISTS`** - every step must be safe to re-run

use sqlx::SqlitePool;
use tracing::{info, warn};
use vivo_common::Result;

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
const CURRENT_SCHEMA_VERSION: i32 = 2;

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Get current schema version from database, 0 for a fresh database
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("✓ Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: study entity tables
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: study entity tables");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS experiments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
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
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS treatment_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            description TEXT,
            UNIQUE (experiment_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subjects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
            treatment_group_id INTEGER REFERENCES treatment_groups(id) ON DELETE SET NULL,
            label TEXT NOT NULL,
            baseline_weight REAL,
            status TEXT NOT NULL DEFAULT 'alive'
                CHECK (status IN ('alive', 'dead', 'sacrificed', 'excluded')),
            exit_date TEXT,
            exit_type TEXT,
            exit_reason TEXT,
            UNIQUE (experiment_id, label)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS observations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_id INTEGER NOT NULL REFERENCES subjects(id) ON DELETE CASCADE,
            experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
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
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_observations_experiment_date
         ON observations (experiment_id, observation_date)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS samples (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_id INTEGER NOT NULL REFERENCES subjects(id) ON DELETE CASCADE,
            experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
            sample_type TEXT NOT NULL,
            collection_date TEXT NOT NULL,
            day_of_study INTEGER NOT NULL,
            storage_location TEXT,
            notes TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_samples_experiment ON samples (experiment_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Migration v2: applied-mutation ledger
///
/// Records the outcome of every applied or conflicted mutation id, so that a
/// push retried after a lost response does not apply anything twice.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: applied_mutations ledger");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS applied_mutations (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            success INTEGER NOT NULL,
            conflict INTEGER NOT NULL DEFAULT 0,
            message TEXT,
            client_timestamp TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
