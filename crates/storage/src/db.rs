//! Connection pool construction and schema bootstrap.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::schema::SCHEMA;
use crate::store::StoreError;

/// Connect to Postgres and verify the connection is usable.
pub async fn connect(database_url: &str) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(25)
        .acquire_timeout(Duration::from_secs(5))
        .max_lifetime(Duration::from_secs(300))
        .connect(database_url)
        .await
        .map_err(|e| StoreError::backend("connect", e))
}

/// Apply the schema. Safe to run on every startup.
pub async fn init_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| StoreError::backend("init_schema", e))?;
    Ok(())
}
