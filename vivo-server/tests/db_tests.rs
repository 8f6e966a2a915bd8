//! Database file lifecycle tests

use tempfile::TempDir;
use vivo_server::db::{init_database_pool, migrations};

#[tokio::test]
async fn test_database_file_created_and_reopened() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("vivo.db");

    let pool = init_database_pool(&db_path).await.unwrap();
    assert!(db_path.exists());
    sqlx::query(
        "INSERT INTO experiments (name, start_date, created_at, updated_at)
         VALUES ('pilot', '2024-01-01', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    let reopened = init_database_pool(&db_path).await.unwrap();
    assert_eq!(migrations::get_schema_version(&reopened).await.unwrap(), 2);
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM experiments")
        .fetch_one(&reopened)
        .await
        .unwrap();
    assert_eq!(count, 1);
}
