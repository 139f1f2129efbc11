//! Replace-by-symbol loading of canonical tables.

use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, info};

use super::StatementStore;
use crate::models::schema::quote_ident;
use crate::models::{CanonicalTable, FieldValue, StatementType};

#[derive(Debug, Error)]
pub enum LoadError {
    /// The incoming or stored column set differs from the fixed schema
    #[error("schema mismatch for {statement_type}: {detail}")]
    SchemaMismatch {
        statement_type: StatementType,
        detail: String,
    },
    #[error("store error while loading {statement_type}: {source}")]
    Store {
        statement_type: StatementType,
        #[source]
        source: sqlx::Error,
    },
}

impl LoadError {
    pub fn statement_type(&self) -> StatementType {
        match self {
            LoadError::SchemaMismatch { statement_type, .. } | LoadError::Store { statement_type, .. } => {
                *statement_type
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub statement_type: StatementType,
    pub symbols_replaced: usize,
    pub rows_deleted: u64,
    pub rows_inserted: u64,
}

fn describe_difference(expected: &[&str], actual: &[String]) -> String {
    let expected_set: BTreeSet<&str> = expected.iter().copied().collect();
    let actual_set: BTreeSet<&str> = actual.iter().map(String::as_str).collect();
    let missing: Vec<&str> = expected_set.difference(&actual_set).copied().collect();
    let unexpected: Vec<&str> = actual_set.difference(&expected_set).copied().collect();

    if missing.is_empty() && unexpected.is_empty() {
        "columns out of order".to_string()
    } else {
        format!("missing [{}], unexpected [{}]", missing.join(", "), unexpected.join(", "))
    }
}

fn check_incoming(table: &CanonicalTable) -> Result<(), LoadError> {
    let statement_type = table.statement_type;
    let schema = statement_type.schema();
    let expected = schema.column_names();
    let mismatch = |detail: String| LoadError::SchemaMismatch { statement_type, detail };

    if table.columns.len() != expected.len() || table.columns.iter().zip(&expected).any(|(a, b)| a != b) {
        return Err(mismatch(describe_difference(&expected, &table.columns)));
    }

    for record in &table.records {
        if record.statement_type != statement_type {
            return Err(mismatch(format!("record {} belongs to {}", record.key(), record.statement_type)));
        }
        let same_columns = record.fields.len() == schema.columns.len()
            && schema.columns.iter().all(|c| record.fields.contains_key(c.name));
        if !same_columns {
            let fields: Vec<String> = record.fields.keys().cloned().collect();
            let data_columns: Vec<&str> = schema.columns.iter().map(|c| c.name).collect();
            return Err(mismatch(format!(
                "record {}: {}",
                record.key(),
                describe_difference(&data_columns, &fields)
            )));
        }
    }
    Ok(())
}

/// Replace the rows of every symbol in `table` with the table's rows.
///
/// Rows of symbols absent from the batch are untouched. The delete and inserts
/// run in one transaction, so readers never observe a half-replaced table, and
/// loads are serialized through the store's writer lock.
pub async fn load_table(store: &StatementStore, table: &CanonicalTable) -> Result<LoadReport, LoadError> {
    let statement_type = table.statement_type;
    check_incoming(table)?;

    let mut report = LoadReport {
        statement_type,
        symbols_replaced: 0,
        rows_deleted: 0,
        rows_inserted: 0,
    };
    if table.is_empty() {
        debug!("Nothing to load for {}", statement_type);
        return Ok(report);
    }

    let store_error = |source| LoadError::Store { statement_type, source };
    let _guard = store.writer().lock().await;

    let name = statement_type.table_name();
    let stored = store.table_columns(name).await.map_err(store_error)?;
    let expected = statement_type.schema().column_names();
    if stored.len() != expected.len() || stored.iter().zip(&expected).any(|(a, b)| a != b) {
        return Err(LoadError::SchemaMismatch {
            statement_type,
            detail: format!("stored table: {}", describe_difference(&expected, &stored)),
        });
    }

    let table_ident = quote_ident(name);
    let delete_sql = format!("DELETE FROM {} WHERE symbol = ?", table_ident);
    let insert_sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table_ident,
        expected.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
        vec!["?"; expected.len()].join(", ")
    );

    let mut tx = store.pool().begin().await.map_err(store_error)?;

    let symbols = table.symbols();
    for symbol in &symbols {
        let result = sqlx::query(&delete_sql)
            .bind(symbol)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        report.rows_deleted += result.rows_affected();
    }

    let data_columns = statement_type.schema().columns;
    for record in &table.records {
        let mut query = sqlx::query(&insert_sql)
            .bind(&record.symbol)
            .bind(record.period_end.format("%Y-%m-%d").to_string());
        for spec in data_columns {
            query = match record.get(spec.name) {
                FieldValue::Number(n) => query.bind(Some(*n)),
                FieldValue::Text(s) => query.bind(Some(s.clone())),
                FieldValue::Null => query.bind(None::<String>),
            };
        }
        let result = query.execute(&mut *tx).await.map_err(store_error)?;
        report.rows_inserted += result.rows_affected();
    }

    tx.commit().await.map_err(store_error)?;
    report.symbols_replaced = symbols.len();

    info!(
        "💾 Loaded {}: {} symbols replaced, {} rows deleted, {} rows inserted",
        statement_type, report.symbols_replaced, report.rows_deleted, report.rows_inserted
    );
    Ok(report)
}
