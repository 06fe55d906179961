//! Database layer with SQLite
//!
//! Provides the workflow definition store and the job store on top of an
//! sqlx connection pool with embedded migrations.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use wfxrs_core::{Error, Result};

// Export models, queries and stores
pub mod job_store;
pub mod models;
pub mod queries;
pub mod workflow_store;

pub use job_store::JobStore;
pub use models::*;
pub use workflow_store::WorkflowStore;

// Embed migrations at compile time
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Database connection pool
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Create a new database connection
    pub async fn new(database_url: &str) -> Result<Self> {
        info!(url = %database_url, "Connecting to database");

        // Extract file path from SQLite URL and ensure parent directory exists
        if let Some(path) = database_url.strip_prefix("sqlite:") {
            let path = path.trim_start_matches("//");
            if !path.starts_with(":memory:") {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        info!(dir = ?parent, "Creating database directory");
                        std::fs::create_dir_all(parent).map_err(|e| {
                            Error::Storage(format!(
                                "Failed to create database directory: {}",
                                e
                            ))
                        })?;
                    }
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| Error::Config(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| Error::Storage(format!("Failed to connect: {}", e)))?;

        Ok(Self { pool })
    }

    /// Create a private in-memory database, used by tests and ephemeral runs.
    ///
    /// Every connection to `sqlite::memory:` opens a fresh database, so the
    /// pool is limited to a single connection.
    pub async fn new_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::Config(format!("Invalid database URL: {}", e)))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| Error::Storage(format!("Failed to connect: {}", e)))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to run migrations: {}", e)))?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Check that the database answers queries
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Database ping failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection
    pub async fn close(self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
