//! Throwaway statement stores backed by temporary directories

use bank_fundamentals::database::StatementStore;
use sqlx::Row;
use tempfile::TempDir;

/// A store that lives as long as its temporary directory
pub struct TestStore {
    pub store: StatementStore,
    _dir: TempDir,
}

impl TestStore {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = StatementStore::open(dir.path().join("alpha_data.db"))
            .await
            .expect("Failed to open test store");
        Self { store, _dir: dir }
    }

    pub async fn execute(&self, sql: &str) {
        sqlx::query(sql)
            .execute(self.store.pool())
            .await
            .unwrap_or_else(|e| panic!("{} failed: {}", sql, e));
    }

    /// Every row of a table rendered as text, in key order
    pub async fn dump(&self, table: &str) -> Vec<Vec<Option<String>>> {
        let columns = self.store.table_columns(table).await.expect("Failed to read columns");
        let select: Vec<String> = columns
            .iter()
            .map(|c| format!("CAST(\"{}\" AS TEXT)", c))
            .collect();
        let sql = format!("SELECT {} FROM \"{}\" ORDER BY symbol, period_end", select.join(", "), table);

        sqlx::query(&sql)
            .fetch_all(self.store.pool())
            .await
            .expect("Failed to dump table")
            .iter()
            .map(|row| (0..columns.len()).map(|i| row.get::<Option<String>, _>(i)).collect())
            .collect()
    }
}
