//! # Local Database Module
//!
//! Local SQLite storage for offline-first operation. Holds the mutation queue
//! and a small key/value table of sync metadata (session token, last sync
//! time). Every write goes straight to the database file, so queued work
//! survives a restart.
//!
//! ## Key Components
//!
//! - `LocalDatabase`: connection pool and schema management
//! - `schema.sql`: idempotent table definitions
//! - `queue.rs`: mutation queue rows
//! - `sync.rs`: sync metadata key/value operations
//!
//! ## Usage
//!
//! ```rust,no_run
//! use floorsync::client::local_db::LocalDatabase;
//!
//! # async fn example() -> Result<(), sqlx::Error> {
//! let db = LocalDatabase::open("/var/lib/floorsync/local.db").await?;
//! let stats = db.get_stats().await?;
//! println!("{} mutations waiting", stats.pending_mutations);
//! # Ok(())
//! # }
//! ```

pub mod queue;
pub mod sync;

pub use queue::AttemptRecord;
pub use sync::StoredSession;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Result as SqlxResult, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Result type for local database operations
pub type Result<T> = SqlxResult<T>;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Layout version written by this build
const SCHEMA_VERSION: i64 = 1;

/// Local database connection manager
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct LocalDatabase {
    pool: SqlitePool,
}

impl LocalDatabase {
    /// Open or create the database in the platform data directory
    pub async fn new() -> Result<Self> {
        Self::open(Self::default_db_path()).await
    }

    /// Open or create the database at `path`
    ///
    /// Creates parent directories as needed and uses WAL mode.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        tracing::debug!(path = %path.display(), "opened local database");
        Self::with_pool(pool).await
    }

    /// Private in-memory database, used by tests and ephemeral sessions
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // One connection that never expires; closing it would drop the data.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Platform-specific path of the database file
    pub fn default_db_path() -> PathBuf {
        let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        path.push("floorsync");
        path.push("local.db");
        path
    }

    /// Create tables and apply pending migrations
    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        self.run_migrations().await
    }

    async fn run_migrations(&self) -> Result<()> {
        let (current_version,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await?;

        if current_version >= SCHEMA_VERSION {
            return Ok(());
        }

        sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
            .bind(SCHEMA_VERSION)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        tracing::info!(from = current_version, to = SCHEMA_VERSION, "local schema migrated");

        Ok(())
    }

    /// Get connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, flushing WAL state to the main file
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Row counts for diagnostics
    pub async fn get_stats(&self) -> Result<DatabaseStats> {
        let (pending, synced, quarantined): (i64, i64, i64) = sqlx::query_as(
            "SELECT
                COALESCE(SUM(CASE WHEN synced = 0 AND quarantined = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN synced = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN synced = 0 AND quarantined = 1 THEN 1 ELSE 0 END), 0)
             FROM mutation_queue",
        )
        .fetch_one(&self.pool)
        .await?;

        let metadata_entries: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_metadata")
            .fetch_one(&self.pool)
            .await?;

        Ok(DatabaseStats {
            pending_mutations: pending as usize,
            synced_unswept: synced as usize,
            quarantined_mutations: quarantined as usize,
            metadata_entries: metadata_entries.0 as usize,
        })
    }
}

/// Database statistics for debugging and status display
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    pub pending_mutations: usize,
    pub synced_unswept: usize,
    pub quarantined_mutations: usize,
    pub metadata_entries: usize,
}
