//! Authoritative study store
//!
//! Repository functions take a `&mut SqliteConnection` so the same code runs
//! on a pooled connection, inside a push transaction, or inside the
//! per-mutation savepoint nested in it.

pub mod experiments;
pub mod ledger;
pub mod migrations;
pub mod observations;
pub mod samples;
pub mod subjects;
pub mod treatment_groups;

use sqlx::SqlitePool;
use std::path::Path;
use vivo_common::Result;

/// Open the server database and bring its schema up to date
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = vivo_common::db::open_pool(db_path, 10).await?;
    migrations::run_migrations(&pool).await?;
    Ok(pool)
}

/// In-memory database with the current schema
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = vivo_common::db::open_memory_pool().await?;
    migrations::run_migrations(&pool).await?;
    Ok(pool)
}
