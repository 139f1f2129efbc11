//! Raw payload normalization
//!
//! Repairs spreadsheet/API tables (header spelling, merged symbol cells, mangled
//! numbers and dates) and maps them onto the fixed column set of their statement
//! type. Bad records are excluded and reported; nothing here fails the table.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, warn};

use crate::models::schema::HeaderTarget;
use crate::models::{
    CanonicalTable, ColumnKind, FieldValue, RawPayload, RecordKey, StatementRecord, StatementType,
};

/// Why a record was excluded from its canonical table
#[derive(Debug, Clone, PartialEq)]
pub enum DefectKind {
    MissingRequiredColumns(Vec<String>),
    RowWidthMismatch { expected: usize, found: usize },
    MissingSymbol,
    UnparsableDate(String),
    NonNumeric { column: String, value: String },
    DuplicateKey,
}

impl fmt::Display for DefectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefectKind::MissingRequiredColumns(columns) => {
                write!(f, "required column(s) missing: {}", columns.join(", "))
            }
            DefectKind::RowWidthMismatch { expected, found } => {
                write!(f, "row has {} cells, header has {}", found, expected)
            }
            DefectKind::MissingSymbol => f.write_str("no symbol for record"),
            DefectKind::UnparsableDate(value) => write!(f, "unparsable period end '{}'", value),
            DefectKind::NonNumeric { column, value } => {
                write!(f, "non-numeric value '{}' in {}", value, column)
            }
            DefectKind::DuplicateKey => f.write_str("duplicate (symbol, period_end); first occurrence kept"),
        }
    }
}

/// A record excluded during normalization
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationDefect {
    pub statement_type: StatementType,
    pub source: String,
    /// 1-based data row within the payload
    pub row: usize,
    pub symbol: Option<String>,
    pub period_end: Option<String>,
    pub kind: DefectKind,
}

impl fmt::Display for NormalizationDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} row {} ({}@{}): {}",
            self.statement_type,
            self.source,
            self.row,
            self.symbol.as_deref().unwrap_or("?"),
            self.period_end.as_deref().unwrap_or("?"),
            self.kind
        )
    }
}

/// A column dropped from a payload
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationWarning {
    pub statement_type: StatementType,
    pub source: String,
    pub column: String,
    pub reason: &'static str,
}

impl fmt::Display for NormalizationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: dropped column '{}' ({})",
            self.statement_type, self.source, self.column, self.reason
        )
    }
}

/// Records extracted from one payload
#[derive(Debug, Default)]
pub struct NormalizedPayload {
    /// Accepted records with their 1-based data row within the payload
    pub records: Vec<(usize, StatementRecord)>,
    pub defects: Vec<NormalizationDefect>,
    pub warnings: Vec<NormalizationWarning>,
}

/// One canonical table assembled from every payload of a statement type
#[derive(Debug)]
pub struct NormalizedTable {
    pub table: CanonicalTable,
    pub defects: Vec<NormalizationDefect>,
    pub warnings: Vec<NormalizationWarning>,
}

const NULL_TOKENS: [&str; 4] = ["", "none", "null", "nan"];

fn is_null_token(cell: &str) -> bool {
    let lower = cell.trim().to_ascii_lowercase();
    NULL_TOKENS.contains(&lower.as_str())
}

/// Spreadsheet-style header cleanup: trim, spaces and dots to underscores
pub fn repair_header(header: &str) -> String {
    header
        .trim()
        .trim_start_matches('\u{feff}')
        .replace([' ', '.'], "_")
}

/// Parse a possibly mangled numeric cell. `Ok(None)` is the null sentinel;
/// `Err(())` means the text is not a number.
pub fn parse_number(cell: &str) -> Result<Option<f64>, ()> {
    if is_null_token(cell) {
        return Ok(None);
    }

    let mut text = cell.trim();
    let mut negative = false;
    if text.starts_with('(') && text.ends_with(')') && text.len() > 2 {
        negative = true;
        text = &text[1..text.len() - 1];
    }

    let mut percent = false;
    if let Some(stripped) = text.strip_suffix('%') {
        percent = true;
        text = stripped;
    }

    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | '€' | '£' | ' '))
        .collect();

    let mut value: f64 = cleaned.parse().map_err(|_| ())?;
    if !value.is_finite() {
        return Err(());
    }
    if percent {
        value /= 100.0;
    }
    Ok(Some(if negative { -value } else { value }))
}

/// Parse a period-end cell in any of the layouts exports produce
pub fn parse_period_end(cell: &str) -> Option<NaiveDate> {
    let text = cell.trim();

    for format in ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
            return Some(datetime.date());
        }
    }

    // Excel serial day numbers (days since 1899-12-30), within a plausible range
    let serial = text.strip_suffix(".0").unwrap_or(text);
    if !serial.is_empty() && serial.chars().all(|c| c.is_ascii_digit()) {
        let days: i64 = serial.parse().ok()?;
        if (20_000..=80_000).contains(&days) {
            return NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_signed(Duration::days(days));
        }
    }
    None
}

/// Convert one raw payload into canonical records of its statement type
pub fn normalize_payload(payload: &RawPayload) -> NormalizedPayload {
    let statement_type = payload.statement_type;
    let schema = statement_type.schema();
    let source = payload.label();
    let mut out = NormalizedPayload::default();

    if payload.is_empty() {
        debug!("{}: empty payload", source);
        return out;
    }

    // Map header positions onto canonical targets
    let mut symbol_idx = None;
    let mut period_idx = None;
    let mut column_idx: HashMap<&'static str, usize> = HashMap::new();
    for (idx, raw_header) in payload.table.headers.iter().enumerate() {
        let header = repair_header(raw_header);
        let drop_reason = if header.is_empty() || header.to_ascii_lowercase().starts_with("unnamed") {
            Some("index or blank column")
        } else {
            match schema.resolve_header(&header) {
                Some(HeaderTarget::Symbol) if symbol_idx.is_none() => {
                    symbol_idx = Some(idx);
                    None
                }
                Some(HeaderTarget::PeriodEnd) if period_idx.is_none() => {
                    period_idx = Some(idx);
                    None
                }
                Some(HeaderTarget::Column(name)) if !column_idx.contains_key(name) => {
                    column_idx.insert(name, idx);
                    None
                }
                Some(_) => Some("duplicate column"),
                None => Some("not in canonical schema"),
            }
        };
        if let Some(reason) = drop_reason {
            out.warnings.push(NormalizationWarning {
                statement_type,
                source: source.clone(),
                column: raw_header.trim().to_string(),
                reason,
            });
        }
    }

    let mut missing: Vec<String> = Vec::new();
    if period_idx.is_none() {
        missing.push(crate::models::schema::PERIOD_END_COLUMN.to_string());
    }
    missing.extend(
        schema
            .required_columns()
            .filter(|c| !column_idx.contains_key(c.name))
            .map(|c| c.name.to_string()),
    );

    let width = payload.table.headers.len();
    let mut last_symbol = payload.symbol.clone();

    for (row_idx, row) in payload.table.rows.iter().enumerate() {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue; // trailing blank spreadsheet rows
        }

        let mut defect = |symbol: Option<String>, period_end: Option<String>, kind: DefectKind| {
            out.defects.push(NormalizationDefect {
                statement_type,
                source: source.clone(),
                row: row_idx + 1,
                symbol,
                period_end,
                kind,
            })
        };

        let cell = |idx: Option<usize>| idx.and_then(|i| row.get(i)).map(|c| c.trim());

        if !missing.is_empty() {
            defect(last_symbol.clone(), cell(period_idx).map(str::to_string), DefectKind::MissingRequiredColumns(missing.clone()));
            continue;
        }

        if row.len() != width {
            // A shifted row's symbol cell is unreliable; later blank cells must not inherit across it
            if symbol_idx.is_some() {
                last_symbol = None;
            }
            defect(
                last_symbol.clone(),
                None,
                DefectKind::RowWidthMismatch { expected: width, found: row.len() },
            );
            continue;
        }

        // Merged symbol cells export as blanks under the first row
        let symbol = match cell(symbol_idx).filter(|s| !s.is_empty()) {
            Some(s) => {
                let s = s.to_ascii_uppercase();
                last_symbol = Some(s.clone());
                Some(s)
            }
            None => last_symbol.clone(),
        };
        let raw_period = cell(period_idx).unwrap_or_default().to_string();
        let Some(symbol) = symbol else {
            defect(None, Some(raw_period), DefectKind::MissingSymbol);
            continue;
        };
        let Some(period_end) = parse_period_end(&raw_period) else {
            defect(Some(symbol), Some(raw_period.clone()), DefectKind::UnparsableDate(raw_period));
            continue;
        };

        let mut fields = BTreeMap::new();
        let mut bad_cells = Vec::new();
        for spec in schema.columns {
            let raw = cell(column_idx.get(spec.name).copied());
            let value = match (spec.kind, raw) {
                (_, None) => FieldValue::Null,
                (ColumnKind::Number, Some(raw)) => match parse_number(raw) {
                    Ok(Some(n)) => FieldValue::Number(n),
                    Ok(None) => FieldValue::Null,
                    Err(()) => {
                        bad_cells.push(DefectKind::NonNumeric {
                            column: spec.name.to_string(),
                            value: raw.to_string(),
                        });
                        FieldValue::Null
                    }
                },
                (ColumnKind::Text, Some(raw)) if is_null_token(raw) => FieldValue::Null,
                (ColumnKind::Text, Some(raw)) => FieldValue::Text(raw.to_string()),
            };
            fields.insert(spec.name.to_string(), value);
        }

        if !bad_cells.is_empty() {
            let period = period_end.format("%Y-%m-%d").to_string();
            for kind in bad_cells {
                defect(Some(symbol.clone()), Some(period.clone()), kind);
            }
            continue;
        }

        out.records.push((
            row_idx + 1,
            StatementRecord {
                symbol,
                period_end,
                statement_type,
                fields,
            },
        ));
    }

    for defect in &out.defects {
        warn!("Normalization defect: {}", defect);
    }
    out
}

/// Normalize every payload of one statement type into a single canonical table.
///
/// Payloads of other statement types are ignored. Records are keyed by
/// (symbol, period_end); a repeated key keeps its first occurrence.
pub fn normalize_batch(statement_type: StatementType, payloads: &[RawPayload]) -> NormalizedTable {
    let mut by_key: BTreeMap<RecordKey, StatementRecord> = BTreeMap::new();
    let mut defects = Vec::new();
    let mut warnings = Vec::new();

    for payload in payloads.iter().filter(|p| p.statement_type == statement_type) {
        let normalized = normalize_payload(payload);
        defects.extend(normalized.defects);
        warnings.extend(normalized.warnings);

        for (row, record) in normalized.records {
            match by_key.entry(record.key()) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
                Entry::Occupied(existing) => {
                    let defect = NormalizationDefect {
                        statement_type,
                        source: payload.label(),
                        row,
                        symbol: Some(existing.key().symbol.clone()),
                        period_end: Some(existing.key().period_end.format("%Y-%m-%d").to_string()),
                        kind: DefectKind::DuplicateKey,
                    };
                    warn!("Normalization defect: {}", defect);
                    defects.push(defect);
                }
            }
        }
    }

    let mut table = CanonicalTable::new(statement_type);
    table.records = by_key.into_values().collect();

    NormalizedTable {
        table,
        defects,
        warnings,
    }
}
