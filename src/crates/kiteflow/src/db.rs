//! Database connection and migrations
//!
//! Provides the SQLite pool that backs the progress ledger. Opening a database
//! never creates the schema; that only happens through `init-db`
//! ([`Database::run_migrations`]), so a fresh file reports as uninitialized
//! instead of silently looking like an empty ledger.

use crate::error::{KiteflowError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Type alias for the database connection pool
pub type DatabasePool = SqlitePool;

/// Database connection wrapper
#[derive(Clone, Debug)]
pub struct Database {
    pub(crate) pool: Arc<DatabasePool>,
}

impl Database {
    /// Open (creating the file if needed) a database with the default pool size
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        Self::with_max_connections(database_path, 5).await
    }

    /// Open a database with a custom pool size
    pub async fn with_max_connections<P: AsRef<Path>>(
        database_path: P,
        max_connections: u32,
    ) -> Result<Self> {
        let path = database_path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    KiteflowError::Database(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        debug!(path = %path.display(), max_connections, "Connecting to database");

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| KiteflowError::Database(format!("Failed to connect to database: {}", e)))?;

        info!(path = %path.display(), "Database connection established");

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Create or upgrade the schema
    ///
    /// Migrations are embedded in the binary from ./migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| KiteflowError::Database(format!("Migration failed: {}", e)))?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Perform a health check by running a simple query
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| KiteflowError::Database(format!("Health check failed: {}", e)))?;

        Ok(())
    }

    /// Close the database connection
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection closed");
    }

    /// Open a database and run all migrations
    pub async fn initialize<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let db = Self::new(database_path).await?;
        db.run_migrations().await?;
        Ok(db)
    }
}
