//! Integration tests for the infrastructure components
//!
//! These tests verify that the PostgreSQL database is properly configured
//! and accessible from the application. They are skipped when
//! `TEST_DATABASE_URL` is not set so the suite stays green on machines
//! without a database.

use common::database::{DatabaseConfig, health_check, init_pool};
use sqlx::Row;

fn test_config() -> Option<DatabaseConfig> {
    let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
    Some(DatabaseConfig {
        database_url,
        max_connections: 5,
        min_connections: 1,
        connection_timeout: 10,
    })
}

#[tokio::test]
async fn test_database_integration() -> Result<(), Box<dyn std::error::Error>> {
    let Some(config) = test_config() else {
        eprintln!("TEST_DATABASE_URL not set, skipping database integration test");
        return Ok(());
    };

    let pool = init_pool(&config).await?;

    assert!(health_check(&pool).await?, "Database health check failed");

    let row = sqlx::query("SELECT 1 as result").fetch_one(&pool).await?;
    let result: i32 = row.get("result");
    assert_eq!(result, 1, "PostgreSQL simple query test failed");

    Ok(())
}
