//! Job and subject persistence.
//!
//! Callers only see the [`JobStore`] and [`SubjectStore`] traits. Two
//! backends implement both: [`MemoryStore`] for single-process use and
//! tests, and [`PgStore`] backed by PostgreSQL.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

use sqlx::postgres::PgPoolOptions;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{JobStore, SubjectStore};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify connectivity.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
