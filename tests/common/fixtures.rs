//! Canonical records and upstream responses

use bank_fundamentals::models::{CanonicalTable, FieldValue, StatementRecord, StatementType};
use chrono::NaiveDate;
use serde_json::{json, Value};

/// A record with every schema column null except the given numbers
pub fn record(statement_type: StatementType, symbol: &str, period_end: &str, values: &[(&str, f64)]) -> StatementRecord {
    let mut fields: std::collections::BTreeMap<String, FieldValue> = statement_type
        .schema()
        .columns
        .iter()
        .map(|c| (c.name.to_string(), FieldValue::Null))
        .collect();
    for (name, value) in values {
        assert!(fields.contains_key(*name), "{} is not a {} column", name, statement_type);
        fields.insert(name.to_string(), FieldValue::Number(*value));
    }

    StatementRecord {
        symbol: symbol.to_string(),
        period_end: NaiveDate::parse_from_str(period_end, "%Y-%m-%d").expect("bad fixture date"),
        statement_type,
        fields,
    }
}

pub fn balance_sheet(symbol: &str, period_end: &str, assets: f64, liabilities: f64, equity: f64) -> StatementRecord {
    record(
        StatementType::BalanceSheet,
        symbol,
        period_end,
        &[
            ("totalAssets", assets),
            ("totalLiabilities", liabilities),
            ("totalShareholderEquity", equity),
        ],
    )
}

pub fn table(statement_type: StatementType, mut records: Vec<StatementRecord>) -> CanonicalTable {
    records.sort_by(|a, b| a.key().cmp(&b.key()));
    let mut table = CanonicalTable::new(statement_type);
    table.records = records;
    table
}

/// Alpha Vantage style statement response with `None` placeholders
pub fn statement_response(statement_type: StatementType, symbol: &str) -> Value {
    let report = match statement_type {
        StatementType::BalanceSheet => json!({
            "fiscalDateEnding": "2024-12-31",
            "reportedCurrency": "USD",
            "totalAssets": "3261519000000",
            "totalLiabilities": "2965960000000",
            "totalShareholderEquity": "295559000000",
            "goodwill": "None"
        }),
        StatementType::IncomeStatement => json!({
            "fiscalDateEnding": "2024-12-31",
            "reportedCurrency": "USD",
            "totalRevenue": "101887000000",
            "incomeBeforeTax": "29251000000",
            "incomeTaxExpense": "2119000000",
            "netIncome": "27132000000"
        }),
        StatementType::CashFlow => json!({
            "fiscalDateEnding": "2024-12-31",
            "reportedCurrency": "USD",
            "operatingCashflow": "-8805000000",
            "cashflowFromInvestment": "-7610000000",
            "cashflowFromFinancing": "18519000000",
            "changeInCashAndCashEquivalents": "2104000000",
            "netIncome": "27132000000"
        }),
        StatementType::Overview => {
            return json!({
                "Symbol": symbol,
                "Name": "Bank of America Corp",
                "Exchange": "NYSE",
                "Currency": "USD",
                "Sector": "FINANCE",
                "LatestQuarter": "2024-12-31",
                "MarketCapitalization": "337895358000",
                "PERatio": "13.16",
                "DividendYield": "0.0234"
            })
        }
    };
    json!({ "symbol": symbol, "annualReports": [report], "quarterlyReports": [] })
}
