//! Fixed per-statement-type schemas.
//!
//! Each statement type is described by a single static [`StatementSchema`]: the key
//! columns, the data columns with their kinds, the header aliases accepted from
//! exports, and the range and cross-field rules the validator applies. Column names
//! are the contract with downstream consumers of the store and must not change.

use super::StatementType;

pub const SYMBOL_COLUMN: &str = "symbol";
pub const PERIOD_END_COLUMN: &str = "period_end";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Number,
    Text,
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub required: bool,
    /// Extra header spellings that do not reduce to `name` by case/separator folding
    pub aliases: &'static [&'static str],
}

const fn required(name: &'static str) -> ColumnSpec {
    ColumnSpec { name, kind: ColumnKind::Number, required: true, aliases: &[] }
}

const fn number(name: &'static str) -> ColumnSpec {
    ColumnSpec { name, kind: ColumnKind::Number, required: false, aliases: &[] }
}

const fn text(name: &'static str) -> ColumnSpec {
    ColumnSpec { name, kind: ColumnKind::Text, required: false, aliases: &[] }
}

const fn aliased(spec: ColumnSpec, aliases: &'static [&'static str]) -> ColumnSpec {
    ColumnSpec { aliases, ..spec }
}

/// `column >= min` (or `>` when strict)
#[derive(Debug, Clone, Copy)]
pub struct RangeRule {
    pub name: &'static str,
    pub column: &'static str,
    pub min: f64,
    pub strict: bool,
}

impl RangeRule {
    pub fn holds(&self, value: f64) -> bool {
        if self.strict {
            value > self.min
        } else {
            value >= self.min
        }
    }
}

/// `total ≈ Σ sign·term`, checked only when every involved field is present
#[derive(Debug, Clone, Copy)]
pub struct SumRule {
    pub name: &'static str,
    pub total: &'static str,
    pub terms: &'static [(f64, &'static str)],
}

impl SumRule {
    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once(self.total).chain(self.terms.iter().map(|&(_, c)| c))
    }

    /// `None` when a field is missing, otherwise (expected, actual)
    pub fn evaluate<F>(&self, value_of: F) -> Option<(f64, f64)>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let actual = value_of(self.total)?;
        let mut expected = 0.0;
        for &(sign, column) in self.terms {
            expected += sign * value_of(column)?;
        }
        Some((expected, actual))
    }
}

/// Relative tolerance of 1% of the larger magnitude, never tighter than 1.0
pub fn approx_equal(a: f64, b: f64) -> bool {
    let tolerance = (a.abs().max(b.abs()) * 0.01).max(1.0);
    (a - b).abs() <= tolerance
}

/// What an export header resolves to
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeaderTarget {
    Symbol,
    PeriodEnd,
    Column(&'static str),
}

#[derive(Debug)]
pub struct StatementSchema {
    pub statement_type: StatementType,
    pub period_aliases: &'static [&'static str],
    pub columns: &'static [ColumnSpec],
    pub range_rules: &'static [RangeRule],
    pub sum_rules: &'static [SumRule],
}

impl StatementSchema {
    /// Key columns followed by data columns, in storage order
    pub fn column_names(&self) -> Vec<&'static str> {
        [SYMBOL_COLUMN, PERIOD_END_COLUMN]
            .into_iter()
            .chain(self.columns.iter().map(|c| c.name))
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&'static ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn required_columns(&self) -> impl Iterator<Item = &'static ColumnSpec> + '_ {
        self.columns.iter().filter(|c| c.required)
    }

    /// Match an export header against key columns, names and aliases,
    /// ignoring case and any non-alphanumeric separators.
    pub fn resolve_header(&self, header: &str) -> Option<HeaderTarget> {
        let key = header_key(header);
        if key.is_empty() {
            return None;
        }
        if ["symbol", "ticker"].contains(&key.as_str()) {
            return Some(HeaderTarget::Symbol);
        }
        if self.period_aliases.iter().any(|alias| header_key(alias) == key) {
            return Some(HeaderTarget::PeriodEnd);
        }
        self.columns
            .iter()
            .find(|c| header_key(c.name) == key || c.aliases.iter().any(|a| header_key(a) == key))
            .map(|c| HeaderTarget::Column(c.name))
    }

    pub fn create_table_sql(&self) -> String {
        let mut columns = vec![
            format!("{} TEXT NOT NULL", quote_ident(SYMBOL_COLUMN)),
            format!("{} TEXT NOT NULL", quote_ident(PERIOD_END_COLUMN)),
        ];
        columns.extend(self.columns.iter().map(|c| {
            let sql_type = match c.kind {
                ColumnKind::Number => "REAL",
                ColumnKind::Text => "TEXT",
            };
            format!("{} {}", quote_ident(c.name), sql_type)
        }));
        columns.push(format!(
            "PRIMARY KEY ({}, {})",
            quote_ident(SYMBOL_COLUMN),
            quote_ident(PERIOD_END_COLUMN)
        ));

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote_ident(self.statement_type.table_name()),
            columns.join(",\n    ")
        )
    }
}

pub fn header_key(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn schema_for(statement_type: StatementType) -> &'static StatementSchema {
    match statement_type {
        StatementType::BalanceSheet => &BALANCE_SHEET,
        StatementType::CashFlow => &CASH_FLOW,
        StatementType::IncomeStatement => &INCOME_STATEMENT,
        StatementType::Overview => &OVERVIEW,
    }
}

const STATEMENT_PERIOD_ALIASES: &[&str] = &["period_end", "fiscalDateEnding", "date"];

pub static BALANCE_SHEET: StatementSchema = StatementSchema {
    statement_type: StatementType::BalanceSheet,
    period_aliases: STATEMENT_PERIOD_ALIASES,
    columns: &[
        text("reportedCurrency"),
        required("totalAssets"),
        number("totalCurrentAssets"),
        number("cashAndCashEquivalentsAtCarryingValue"),
        number("cashAndShortTermInvestments"),
        number("inventory"),
        number("currentNetReceivables"),
        number("totalNonCurrentAssets"),
        number("propertyPlantEquipment"),
        number("accumulatedDepreciationAmortizationPPE"),
        number("intangibleAssets"),
        number("intangibleAssetsExcludingGoodwill"),
        number("goodwill"),
        number("investments"),
        number("longTermInvestments"),
        number("shortTermInvestments"),
        number("otherCurrentAssets"),
        number("otherNonCurrentAssets"),
        required("totalLiabilities"),
        number("totalCurrentLiabilities"),
        number("currentAccountsPayable"),
        number("deferredRevenue"),
        number("currentDebt"),
        number("shortTermDebt"),
        number("totalNonCurrentLiabilities"),
        number("capitalLeaseObligations"),
        number("longTermDebt"),
        number("currentLongTermDebt"),
        number("longTermDebtNoncurrent"),
        number("shortLongTermDebtTotal"),
        number("otherCurrentLiabilities"),
        number("otherNonCurrentLiabilities"),
        required("totalShareholderEquity"),
        number("treasuryStock"),
        number("retainedEarnings"),
        number("commonStock"),
        number("commonStockSharesOutstanding"),
    ],
    range_rules: &[
        RangeRule { name: "non_negative_total_assets", column: "totalAssets", min: 0.0, strict: false },
        RangeRule { name: "non_negative_total_liabilities", column: "totalLiabilities", min: 0.0, strict: false },
    ],
    sum_rules: &[SumRule {
        name: "assets_equal_liabilities_plus_equity",
        total: "totalAssets",
        terms: &[(1.0, "totalLiabilities"), (1.0, "totalShareholderEquity")],
    }],
};

pub static INCOME_STATEMENT: StatementSchema = StatementSchema {
    statement_type: StatementType::IncomeStatement,
    period_aliases: STATEMENT_PERIOD_ALIASES,
    columns: &[
        text("reportedCurrency"),
        number("grossProfit"),
        required("totalRevenue"),
        number("costOfRevenue"),
        number("costofGoodsAndServicesSold"),
        number("operatingIncome"),
        number("sellingGeneralAndAdministrative"),
        number("researchAndDevelopment"),
        number("operatingExpenses"),
        number("investmentIncomeNet"),
        number("netInterestIncome"),
        number("interestIncome"),
        number("interestExpense"),
        number("nonInterestIncome"),
        number("otherNonOperatingIncome"),
        number("depreciation"),
        number("depreciationAndAmortization"),
        number("incomeBeforeTax"),
        number("incomeTaxExpense"),
        number("interestAndDebtExpense"),
        number("netIncomeFromContinuingOperations"),
        number("comprehensiveIncomeNetOfTax"),
        number("ebit"),
        number("ebitda"),
        required("netIncome"),
    ],
    range_rules: &[RangeRule { name: "positive_total_revenue", column: "totalRevenue", min: 0.0, strict: true }],
    sum_rules: &[SumRule {
        name: "net_income_equals_pretax_less_tax",
        total: "netIncome",
        terms: &[(1.0, "incomeBeforeTax"), (-1.0, "incomeTaxExpense")],
    }],
};

pub static CASH_FLOW: StatementSchema = StatementSchema {
    statement_type: StatementType::CashFlow,
    period_aliases: STATEMENT_PERIOD_ALIASES,
    columns: &[
        text("reportedCurrency"),
        required("operatingCashflow"),
        number("paymentsForOperatingActivities"),
        number("proceedsFromOperatingActivities"),
        number("changeInOperatingLiabilities"),
        number("changeInOperatingAssets"),
        number("depreciationDepletionAndAmortization"),
        number("capitalExpenditures"),
        number("changeInReceivables"),
        number("changeInInventory"),
        number("profitLoss"),
        number("cashflowFromInvestment"),
        number("cashflowFromFinancing"),
        number("proceedsFromRepaymentsOfShortTermDebt"),
        number("paymentsForRepurchaseOfCommonStock"),
        number("paymentsForRepurchaseOfEquity"),
        number("paymentsForRepurchaseOfPreferredStock"),
        number("dividendPayout"),
        number("dividendPayoutCommonStock"),
        number("dividendPayoutPreferredStock"),
        number("proceedsFromIssuanceOfCommonStock"),
        number("proceedsFromIssuanceOfLongTermDebtAndCapitalSecuritiesNet"),
        number("proceedsFromIssuanceOfPreferredStock"),
        number("proceedsFromRepurchaseOfEquity"),
        number("proceedsFromSaleOfTreasuryStock"),
        number("changeInCashAndCashEquivalents"),
        number("changeInExchangeRate"),
        required("netIncome"),
    ],
    range_rules: &[],
    sum_rules: &[SumRule {
        name: "cash_change_equals_activity_sum",
        total: "changeInCashAndCashEquivalents",
        terms: &[
            (1.0, "operatingCashflow"),
            (1.0, "cashflowFromInvestment"),
            (1.0, "cashflowFromFinancing"),
        ],
    }],
};

pub static OVERVIEW: StatementSchema = StatementSchema {
    statement_type: StatementType::Overview,
    period_aliases: &["period_end", "LatestQuarter"],
    columns: &[
        text("name"),
        text("exchange"),
        text("currency"),
        text("country"),
        text("sector"),
        text("industry"),
        text("fiscalYearEnd"),
        required("marketCapitalization"),
        number("ebitda"),
        number("peRatio"),
        number("pegRatio"),
        number("bookValue"),
        number("dividendPerShare"),
        number("dividendYield"),
        number("eps"),
        number("revenuePerShareTtm"),
        number("profitMargin"),
        number("operatingMarginTtm"),
        number("returnOnAssetsTtm"),
        number("returnOnEquityTtm"),
        number("revenueTtm"),
        number("grossProfitTtm"),
        number("dilutedEpsTtm"),
        number("analystTargetPrice"),
        number("trailingPe"),
        number("forwardPe"),
        number("priceToSalesRatioTtm"),
        number("priceToBookRatio"),
        number("beta"),
        aliased(number("week52High"), &["52WeekHigh"]),
        aliased(number("week52Low"), &["52WeekLow"]),
        aliased(number("movingAverage50Day"), &["50DayMovingAverage"]),
        aliased(number("movingAverage200Day"), &["200DayMovingAverage"]),
        number("sharesOutstanding"),
        text("dividendDate"),
        text("exDividendDate"),
    ],
    range_rules: &[RangeRule {
        name: "non_negative_market_capitalization",
        column: "marketCapitalization",
        min: 0.0,
        strict: false,
    }],
    sum_rules: &[],
};
