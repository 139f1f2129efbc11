use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::models::schema::quote_ident;
use crate::models::{ConfigError, StatementType};

pub mod loader;
pub use loader::{load_table, LoadError, LoadReport};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// SQLite store holding one table per statement type
#[derive(Debug, Clone)]
pub struct StatementStore {
    pool: SqlitePool,
    path: PathBuf,
    /// Serializes loads so two statement types never write at once
    writer: Arc<Mutex<()>>,
}

impl StatementStore {
    /// Open (creating if needed) the store and make sure every statement table exists.
    /// Any failure here means the store is unreachable.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        Self::connect(&path)
            .await
            .map_err(|source| ConfigError::StoreUnreachable {
                path: path.display().to_string(),
                source,
            })
    }

    async fn connect(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            // WAL keeps readers on the last committed snapshot during a load
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            path: path.to_path_buf(),
            writer: Arc::new(Mutex::new(())),
        };
        store.ensure_schema().await?;
        info!("💾 Statement store ready at {}", path.display());
        Ok(store)
    }

    /// Create missing statement tables. Existing tables are left untouched;
    /// a table with the wrong shape is caught when loading.
    async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        for statement_type in StatementType::ALL {
            sqlx::query(&statement_type.schema().create_table_sql())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn writer(&self) -> &Mutex<()> {
        &self.writer
    }

    /// Column names of a stored table in declaration order; empty if the table is absent
    pub async fn table_columns(&self, table: &str) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| r.try_get::<String, _>("name")).collect()
    }

    pub async fn row_count(&self, statement_type: StatementType) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) AS n FROM {}",
            quote_ident(statement_type.table_name())
        ))
        .fetch_one(&self.pool)
        .await?;
        row.try_get("n")
    }

    /// Distinct symbols present in a statement table
    pub async fn symbols(&self, statement_type: StatementType) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT symbol FROM {} ORDER BY symbol",
            quote_ident(statement_type.table_name())
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| r.try_get::<String, _>("symbol")).collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
