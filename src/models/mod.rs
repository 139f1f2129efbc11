use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub mod schema;
pub use schema::{ColumnKind, ColumnSpec, StatementSchema};

/// The four statement types the pipeline knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatementType {
    BalanceSheet,
    CashFlow,
    IncomeStatement,
    Overview,
}

impl StatementType {
    pub const ALL: [StatementType; 4] = [
        StatementType::BalanceSheet,
        StatementType::CashFlow,
        StatementType::IncomeStatement,
        StatementType::Overview,
    ];

    /// Table name in the store; part of the contract with the BI layer
    pub fn table_name(self) -> &'static str {
        match self {
            StatementType::BalanceSheet => "balance_sheet",
            StatementType::CashFlow => "cash_flow",
            StatementType::IncomeStatement => "income_statement",
            StatementType::Overview => "overview",
        }
    }

    /// Alpha Vantage `function` parameter
    pub fn api_function(self) -> &'static str {
        match self {
            StatementType::BalanceSheet => "BALANCE_SHEET",
            StatementType::CashFlow => "CASH_FLOW",
            StatementType::IncomeStatement => "INCOME_STATEMENT",
            StatementType::Overview => "OVERVIEW",
        }
    }

    pub fn schema(self) -> &'static StatementSchema {
        schema::schema_for(self)
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for StatementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        StatementType::ALL
            .into_iter()
            .find(|t| t.table_name() == key)
            .ok_or_else(|| format!("unknown statement type '{}'", s))
    }
}

/// A single cell of a canonical record. `Null` is the sentinel for missing data.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Null,
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

/// Identity of a record within one statement table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub symbol: String,
    pub period_end: NaiveDate,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.period_end.format("%Y-%m-%d"))
    }
}

/// One row of a statement for one symbol and one period
#[derive(Debug, Clone, PartialEq)]
pub struct StatementRecord {
    pub symbol: String,
    pub period_end: NaiveDate,
    pub statement_type: StatementType,
    /// Keyed by canonical column name; always holds every data column of the schema
    pub fields: BTreeMap<String, FieldValue>,
}

impl StatementRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            symbol: self.symbol.clone(),
            period_end: self.period_end,
        }
    }

    pub fn get(&self, column: &str) -> &FieldValue {
        self.fields.get(column).unwrap_or(&FieldValue::Null)
    }

    pub fn number(&self, column: &str) -> Option<f64> {
        self.get(column).as_number()
    }
}

/// Header row plus string cells, exactly as received
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() || self.rows.is_empty()
    }

    /// Flatten a list of JSON objects into a table. Headers are the union of keys
    /// in first-seen order; missing keys become empty cells.
    pub fn from_json_objects<'a, I>(objects: I) -> Self
    where
        I: IntoIterator<Item = &'a serde_json::Map<String, serde_json::Value>>,
    {
        let objects: Vec<_> = objects.into_iter().collect();
        let mut headers: Vec<String> = Vec::new();
        for object in &objects {
            for key in object.keys() {
                if !headers.iter().any(|h| h == key) {
                    headers.push(key.clone());
                }
            }
        }

        let rows = objects
            .iter()
            .map(|object| {
                headers
                    .iter()
                    .map(|header| match object.get(header) {
                        None | Some(serde_json::Value::Null) => String::new(),
                        Some(serde_json::Value::String(s)) => s.clone(),
                        Some(other) => other.to_string(),
                    })
                    .collect()
            })
            .collect();

        Self { headers, rows }
    }
}

/// Where a raw payload came from
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadSource {
    Api,
    Spreadsheet(PathBuf),
}

/// Unprocessed response for one (symbol, statement type) pair
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    /// Known when the payload was fetched for a symbol or the export file names one
    pub symbol: Option<String>,
    pub statement_type: StatementType,
    pub source: PayloadSource,
    pub table: RawTable,
}

impl RawPayload {
    pub fn from_api(symbol: &str, statement_type: StatementType, table: RawTable) -> Self {
        Self {
            symbol: Some(symbol.to_string()),
            statement_type,
            source: PayloadSource::Api,
            table,
        }
    }

    /// "No data for symbol" is an empty payload, not a failure
    pub fn empty(symbol: &str, statement_type: StatementType) -> Self {
        Self::from_api(symbol, statement_type, RawTable::default())
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Short human label used in defects and logs
    pub fn label(&self) -> String {
        match &self.source {
            PayloadSource::Api => format!(
                "api:{}/{}",
                self.symbol.as_deref().unwrap_or("?"),
                self.statement_type
            ),
            PayloadSource::Spreadsheet(path) => format!("file:{}", path.display()),
        }
    }
}

/// Records of a single statement type sharing the canonical column set
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTable {
    pub statement_type: StatementType,
    pub columns: Vec<String>,
    pub records: Vec<StatementRecord>,
}

impl CanonicalTable {
    pub fn new(statement_type: StatementType) -> Self {
        Self {
            statement_type,
            columns: statement_type
                .schema()
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn symbols(&self) -> BTreeSet<String> {
        self.records.iter().map(|r| r.symbol.clone()).collect()
    }
}

/// Which report list to take from statement responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPeriod {
    Annual,
    Quarterly,
}

impl ReportPeriod {
    pub fn json_key(self) -> &'static str {
        match self {
            ReportPeriod::Annual => "annualReports",
            ReportPeriod::Quarterly => "quarterlyReports",
        }
    }
}

impl FromStr for ReportPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "annual" => Ok(ReportPeriod::Annual),
            "quarterly" => Ok(ReportPeriod::Quarterly),
            other => Err(format!("expected 'annual' or 'quarterly', got '{}'", other)),
        }
    }
}

/// Errors that abort a run before any fetch happens
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable required")]
    MissingCredential(&'static str),
    #[error("no symbols configured")]
    NoSymbols,
    #[error("invalid value '{value}' for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid API base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
    #[error("store at {path} is unreachable: {source}")]
    StoreUnreachable {
        path: String,
        #[source]
        source: crate::database::StoreError,
    },
}

pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co/query";
pub const DEFAULT_DATABASE_PATH: &str = "db/alpha_data.db";
pub const DEFAULT_SYMBOLS: &str = "WFC,BAC,JPM,C,GS,MS";

/// Configuration for the pipeline
#[derive(Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: String,
    pub database_path: String,
    pub symbols: Vec<String>,
    pub fetch_workers: usize,
    pub max_attempts: u32,
    pub rate_limit_per_minute: u32,
    pub run_timeout: Duration,
    pub report_period: ReportPeriod,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("database_path", &self.database_path)
            .field("symbols", &self.symbols)
            .field("fetch_workers", &self.fetch_workers)
            .field("max_attempts", &self.max_attempts)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("run_timeout", &self.run_timeout)
            .field("report_period", &self.report_period)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if it exists
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("ALPHA_VANTAGE_API_KEY")
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        let symbols = normalize_symbols(
            lookup("BANK_SYMBOLS")
                .unwrap_or_else(|| DEFAULT_SYMBOLS.to_string())
                .split(','),
        )?;

        let report_period = match lookup("REPORT_PERIOD") {
            Some(value) => value.parse().map_err(|reason| ConfigError::InvalidValue {
                var: "REPORT_PERIOD",
                value,
                reason,
            })?,
            None => ReportPeriod::Annual,
        };

        Ok(Config {
            api_key,
            base_url: lookup("ALPHA_VANTAGE_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            database_path: lookup("DATABASE_PATH").unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string()),
            symbols,
            fetch_workers: parse_var(&lookup, "FETCH_WORKERS", 4usize)?.max(1),
            max_attempts: parse_var(&lookup, "FETCH_MAX_ATTEMPTS", 3u32)?.max(1),
            rate_limit_per_minute: parse_var(&lookup, "RATE_LIMIT_PER_MINUTE", 75u32)?.max(1),
            run_timeout: Duration::from_secs(parse_var(&lookup, "RUN_TIMEOUT_SECS", 600u64)?),
            report_period,
        })
    }

    /// The API key, or the configuration error that aborts a fetch run
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or(ConfigError::MissingCredential("ALPHA_VANTAGE_API_KEY"))
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var,
            value,
            reason: e.to_string(),
        }),
    }
}

/// Trim, upper-case and de-duplicate ticker symbols, keeping first-seen order
pub fn normalize_symbols<I, S>(symbols: I) -> Result<Vec<String>, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = BTreeSet::new();
    let normalized: Vec<String> = symbols
        .into_iter()
        .map(|s| s.as_ref().trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect();

    if normalized.is_empty() {
        return Err(ConfigError::NoSymbols);
    }
    Ok(normalized)
}
