//! Persistence for the pagebench job hierarchy.
//!
//! Records are stored as versioned JSON documents behind the object-safe
//! [`DocumentStore`] trait. [`Repo`] layers typed access, optimistic
//! compare-and-swap updates, and id allocation on top. Two backends are
//! provided: [`MemoryStore`] and the PostgreSQL-backed [`PgStore`].

pub mod memory;
pub mod models;
pub mod postgres;
pub mod repo;
pub mod store;

use sqlx::postgres::PgPoolOptions;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use repo::{Entity, Repo, Update, Versioned};
pub use store::{Document, DocumentStore, StoreError};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Run a trivial query to verify the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await?;
    Ok(())
}

/// Apply the embedded migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
