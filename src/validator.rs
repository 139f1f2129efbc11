//! Read-only validation of the statement store.
//!
//! Every table is streamed row by row and checked for required-field presence,
//! numeric types, ranges, period dates and cross-field arithmetic. Problems are
//! collected, never fixed: the store is only ever read here.

use chrono::NaiveDate;
use futures::TryStreamExt;
use sqlx::Row;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info, warn};

use crate::database::StatementStore;
use crate::models::schema::{approx_equal, quote_ident, StatementSchema, PERIOD_END_COLUMN, SYMBOL_COLUMN};
use crate::models::{ColumnKind, FieldValue, StatementType};

pub const RULE_TABLE_PRESENT: &str = "table_present";
pub const RULE_COLUMN_PRESENT: &str = "column_present";
pub const RULE_KEY_PRESENT: &str = "key_present";
pub const RULE_PERIOD_END_DATE: &str = "period_end_date";
pub const RULE_REQUIRED_FIELD: &str = "required_field_present";
pub const RULE_NUMERIC_TYPE: &str = "numeric_type";

/// Identifies the offending record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ViolationKey {
    pub symbol: String,
    pub period_end: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ValidationViolation {
    pub statement_type: StatementType,
    /// `None` for table-level problems
    pub key: Option<ViolationKey>,
    pub rule: String,
    pub message: String,
}

impl fmt::Display for ValidationViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(
                f,
                "{} {}@{} [{}] {}",
                self.statement_type, key.symbol, key.period_end, self.rule, self.message
            ),
            None => write!(f, "{} [{}] {}", self.statement_type, self.rule, self.message),
        }
    }
}

/// Outcome of one validation pass; empty means pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub violations: Vec<ValidationViolation>,
    pub rows_checked: usize,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn counts_by_rule(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for violation in &self.violations {
            *counts.entry(violation.rule.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

/// One stored row as read back from SQLite
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub symbol: Option<String>,
    pub period_end: Option<String>,
    pub fields: BTreeMap<String, FieldValue>,
}

/// Map a SQLite storage class and its text rendering onto a field value
fn stored_value(storage_class: &str, text: Option<String>) -> FieldValue {
    match (storage_class, text) {
        (_, None) | ("null", _) => FieldValue::Null,
        ("integer" | "real", Some(text)) => text
            .parse::<f64>()
            .map(FieldValue::Number)
            .unwrap_or(FieldValue::Text(text)),
        (_, Some(text)) => FieldValue::Text(text),
    }
}

fn violation(
    statement_type: StatementType,
    key: &ViolationKey,
    rule: &str,
    message: String,
) -> ValidationViolation {
    ValidationViolation {
        statement_type,
        key: Some(key.clone()),
        rule: rule.to_string(),
        message,
    }
}

/// Check one stored row against its schema. Columns missing from the table are
/// reported once at table level, so they are skipped here.
pub fn check_row(schema: &StatementSchema, row: &StoredRow) -> Vec<ValidationViolation> {
    let statement_type = schema.statement_type;
    let key = ViolationKey {
        symbol: row.symbol.clone().unwrap_or_default(),
        period_end: row.period_end.clone().unwrap_or_default(),
    };
    let mut found = Vec::new();

    if row.symbol.as_deref().map_or(true, |s| s.trim().is_empty()) {
        found.push(violation(statement_type, &key, RULE_KEY_PRESENT, "symbol is missing".to_string()));
    }
    match row.period_end.as_deref() {
        None => found.push(violation(
            statement_type,
            &key,
            RULE_KEY_PRESENT,
            "period_end is missing".to_string(),
        )),
        Some(raw) if NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_err() => found.push(violation(
            statement_type,
            &key,
            RULE_PERIOD_END_DATE,
            format!("period_end '{}' is not an ISO date", raw),
        )),
        Some(_) => {}
    }

    for spec in schema.columns {
        let Some(value) = row.fields.get(spec.name) else {
            continue;
        };
        if spec.required && value.is_null() {
            found.push(violation(
                statement_type,
                &key,
                RULE_REQUIRED_FIELD,
                format!("{} is null", spec.name),
            ));
        }
        if let (ColumnKind::Number, FieldValue::Text(text)) = (spec.kind, value) {
            found.push(violation(
                statement_type,
                &key,
                RULE_NUMERIC_TYPE,
                format!("{} holds non-numeric value '{}'", spec.name, text),
            ));
        }
    }

    let number = |column: &str| row.fields.get(column).and_then(FieldValue::as_number);

    for rule in schema.range_rules {
        if let Some(value) = number(rule.column) {
            if !rule.holds(value) {
                let op = if rule.strict { ">" } else { ">=" };
                found.push(violation(
                    statement_type,
                    &key,
                    rule.name,
                    format!("{} = {} violates {} {} {}", rule.column, value, rule.column, op, rule.min),
                ));
            }
        }
    }

    for rule in schema.sum_rules {
        if let Some((expected, actual)) = rule.evaluate(number) {
            if !approx_equal(expected, actual) {
                found.push(violation(
                    statement_type,
                    &key,
                    rule.name,
                    format!(
                        "{} = {} but components sum to {} (difference {})",
                        rule.total,
                        actual,
                        expected,
                        actual - expected
                    ),
                ));
            }
        }
    }

    found
}

async fn validate_table(
    store: &StatementStore,
    statement_type: StatementType,
    report: &mut ValidationReport,
) -> Result<(), sqlx::Error> {
    let schema = statement_type.schema();
    let table = statement_type.table_name();
    let stored: BTreeSet<String> = store.table_columns(table).await?.into_iter().collect();

    if stored.is_empty() {
        report.violations.push(ValidationViolation {
            statement_type,
            key: None,
            rule: RULE_TABLE_PRESENT.to_string(),
            message: format!("table {} does not exist", table),
        });
        return Ok(());
    }

    for name in schema.column_names() {
        if !stored.contains(name) {
            report.violations.push(ValidationViolation {
                statement_type,
                key: None,
                rule: RULE_COLUMN_PRESENT.to_string(),
                message: format!("column {} is missing from {}", name, table),
            });
        }
    }

    let key_expr = |column: &str| {
        if stored.contains(column) {
            format!("CAST({} AS TEXT)", quote_ident(column))
        } else {
            "NULL".to_string()
        }
    };
    let present: Vec<&str> = schema
        .columns
        .iter()
        .map(|c| c.name)
        .filter(|name| stored.contains(*name))
        .collect();

    let mut select = vec![key_expr(SYMBOL_COLUMN), key_expr(PERIOD_END_COLUMN)];
    for name in &present {
        select.push(format!("typeof({})", quote_ident(name)));
        select.push(format!("CAST({} AS TEXT)", quote_ident(name)));
    }
    let sql = format!("SELECT {} FROM {} ORDER BY 1, 2", select.join(", "), quote_ident(table));

    let mut rows = sqlx::query(&sql).fetch(store.pool());
    let mut checked = 0;
    while let Some(row) = rows.try_next().await? {
        let mut fields = BTreeMap::new();
        for (i, name) in present.iter().enumerate() {
            let storage_class: String = row.try_get(2 + 2 * i)?;
            let text: Option<String> = row.try_get(3 + 2 * i)?;
            fields.insert(name.to_string(), stored_value(&storage_class, text));
        }
        let stored_row = StoredRow {
            symbol: row.try_get(0)?,
            period_end: row.try_get(1)?,
            fields,
        };
        report.violations.extend(check_row(schema, &stored_row));
        checked += 1;
    }

    debug!("Checked {} rows of {}", checked, table);
    report.rows_checked += checked;
    Ok(())
}

/// Validate every statement table. Violations are ordered by statement type,
/// symbol, period end and rule, so two passes over the same store compare equal.
pub async fn validate_store(store: &StatementStore) -> Result<ValidationReport, sqlx::Error> {
    info!("🔍 Validating statement store {}", store.path().display());

    let mut report = ValidationReport::default();
    for statement_type in StatementType::ALL {
        validate_table(store, statement_type, &mut report).await?;
    }
    report.violations.sort();

    if report.is_clean() {
        info!("✅ Validation passed: {} rows checked", report.rows_checked);
    } else {
        warn!(
            "⚠️ Validation found {} violation(s) across {} rows",
            report.len(),
            report.rows_checked
        );
    }
    Ok(report)
}
