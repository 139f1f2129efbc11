//! End-to-end pipeline runs: mock upstream and spreadsheet exports into a temp store

use assert_matches::assert_matches;
use bank_fundamentals::api::AlphaVantageClient;
use bank_fundamentals::models::StatementType;
use bank_fundamentals::normalizer::DefectKind;
use bank_fundamentals::pipeline::{Pipeline, PipelineError, RunOutcome};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{fixtures, logging, test_config, TestStore};

async fn mount_statements(server: &MockServer, symbol: &str, skip: Option<StatementType>) {
    for statement_type in StatementType::ALL.into_iter().filter(|t| Some(*t) != skip) {
        Mock::given(path("/query"))
            .and(query_param("function", statement_type.api_function()))
            .and(query_param("symbol", symbol))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::statement_response(statement_type, symbol)))
            .mount(server)
            .await;
    }
}

#[test_log::test(tokio::test)]
async fn test_fetch_run_with_one_throttled_pair() {
    logging::log_test_step("Fetching two banks with WFC overview throttled");
    let server = MockServer::start().await;
    mount_statements(&server, "BAC", None).await;
    mount_statements(&server, "WFC", Some(StatementType::Overview)).await;
    Mock::given(query_param("function", "OVERVIEW"))
        .and(query_param("symbol", "WFC"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Note": "Our standard API call frequency is 5 calls per minute and 500 calls per day."
        })))
        .expect(2)
        .mount(&server)
        .await;

    let config = test_config(&format!("{}/query", server.uri()), &["BAC", "WFC"]);
    let test = TestStore::new().await;
    let pipeline = Pipeline::new(test.store.clone(), config.clone());
    let client = AlphaVantageClient::new(&config).unwrap();

    let summary = pipeline.run_fetch(Arc::new(client)).await;

    assert_eq!(summary.payloads, 7);
    assert_eq!(summary.fetch_failures.len(), 1);
    let failure = &summary.fetch_failures[0];
    assert_eq!((failure.symbol.as_str(), failure.statement_type, failure.attempts), ("WFC", StatementType::Overview, 2));

    assert!(summary.defects.is_empty(), "{:?}", summary.defects);
    assert_eq!(summary.outcome(), RunOutcome::Clean, "{}", summary);
    assert_eq!(test.store.row_count(StatementType::BalanceSheet).await.unwrap(), 2);
    assert_eq!(test.store.row_count(StatementType::Overview).await.unwrap(), 1);
    assert_eq!(test.store.symbols(StatementType::Overview).await.unwrap(), vec!["BAC"]);
}

#[test_log::test(tokio::test)]
async fn test_run_deadline_aborts_fetch() {
    let server = MockServer::start().await;
    Mock::given(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let mut config = test_config(&format!("{}/query", server.uri()), &["BAC"]);
    config.run_timeout = Duration::from_millis(200);
    let test = TestStore::new().await;
    let pipeline = Pipeline::new(test.store.clone(), config.clone());

    let started = std::time::Instant::now();
    let summary = pipeline.run_fetch(Arc::new(AlphaVantageClient::new(&config).unwrap())).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_matches!(summary.fatal, Some(PipelineError::Timeout(_)));
    assert_eq!(summary.exit_code(), 2);
    assert_eq!(test.store.row_count(StatementType::BalanceSheet).await.unwrap(), 0);
}

fn write_exports(dir: &std::path::Path) {
    std::fs::write(
        dir.join("balance_sheet.csv"),
        "Unnamed: 0,Symbol,Fiscal Date Ending,Total Assets,Total Liabilities,Total Shareholder Equity,Reported Currency\n\
         0,BAC,2024-12-31,\"3,261,519\",\"2,965,960\",\"295,559\",USD\n\
         1,,12/31/2023,\"3,180,151\",\"2,888,505\",\"291,646\",USD\n\
         2,WFC,2024-12-31,\"1,929,845\",\"1,748,245\",\"181,066\",USD,shifted\n\
         3,WFC,45291,\"1,932,468\",\"1,745,400\",\"187,068\",USD\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("BAC_income_statement.csv"),
        "fiscalDateEnding,totalRevenue,netIncome,incomeBeforeTax,incomeTaxExpense\n\
         2024-12-31,N/A,\"27,132\",29251,2119\n\
         2023-12-31,\"98,581\",\"26,515\",28342,(1827)\n",
    )
    .unwrap();
}

#[test_log::test(tokio::test)]
async fn test_import_repairs_exports_and_excludes_bad_rows() {
    let exports = tempfile::tempdir().unwrap();
    write_exports(exports.path());

    let test = TestStore::new().await;
    let pipeline = Pipeline::new(test.store.clone(), test_config("http://localhost/query", &["BAC"]));
    let summary = pipeline.run_import(exports.path()).await;

    assert_eq!(summary.payloads, 2);
    let kinds: Vec<&DefectKind> = summary.defects.iter().map(|d| &d.kind).collect();
    assert_eq!(kinds.len(), 2, "{}", summary);
    assert!(kinds.contains(&&DefectKind::RowWidthMismatch { expected: 7, found: 8 }));
    assert!(kinds.contains(&&DefectKind::NonNumeric {
        column: "totalRevenue".to_string(),
        value: "N/A".to_string()
    }));
    assert!(summary.warnings.iter().any(|w| w.column == "Unnamed: 0"));

    let rows = test.dump("balance_sheet").await;
    let keys: Vec<(String, String)> = rows
        .iter()
        .map(|r| (r[0].clone().unwrap(), r[1].clone().unwrap()))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("BAC".to_string(), "2023-12-31".to_string()),
            ("BAC".to_string(), "2024-12-31".to_string()),
            ("WFC".to_string(), "2023-12-31".to_string()),
        ]
    );
    assert_eq!(test.store.row_count(StatementType::IncomeStatement).await.unwrap(), 1);
    // Accounting negative read back as a negative tax expense, which breaks the income rule
    assert_eq!(summary.outcome(), RunOutcome::ViolationsReported);
    let violations = &summary.validation.as_ref().unwrap().violations;
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule, "net_income_equals_pretax_less_tax");

    // Re-importing the same exports leaves the store unchanged
    let again = pipeline.run_import(exports.path()).await;
    assert_eq!(again.rows_loaded(), summary.rows_loaded());
    assert_eq!(test.dump("balance_sheet").await, rows);
}

#[test_log::test(tokio::test)]
async fn test_import_reads_workbook_exports() {
    let exports = tempfile::tempdir().unwrap();
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, header) in ["Symbol", "LatestQuarter", "MarketCapitalization", "Name"].iter().enumerate() {
        sheet.write_string(0, col as u16, *header).unwrap();
    }
    sheet.write_string(1, 0, "BAC").unwrap();
    sheet.write_number(1, 1, 45657.0).unwrap();
    sheet.write_number(1, 2, 305_000_000_000.0).unwrap();
    sheet.write_string(1, 3, "Bank of America Corp").unwrap();
    sheet.write_string(2, 0, "JPM").unwrap();
    sheet.write_string(2, 1, "2024-12-31").unwrap();
    sheet.write_number(2, 2, 610_000_000_000.0).unwrap();
    workbook.save(exports.path().join("overview.xlsx")).unwrap();

    let test = TestStore::new().await;
    let pipeline = Pipeline::new(test.store.clone(), test_config("http://localhost/query", &["BAC"]));
    let summary = pipeline.run_import(exports.path()).await;

    assert_eq!(summary.payloads, 1);
    assert!(summary.defects.is_empty(), "{}", summary);
    let rows = test.dump("overview").await;
    let keys: Vec<(String, String)> = rows
        .iter()
        .map(|r| (r[0].clone().unwrap(), r[1].clone().unwrap()))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("BAC".to_string(), "2024-12-31".to_string()),
            ("JPM".to_string(), "2024-12-31".to_string()),
        ]
    );
}

#[test_log::test(tokio::test)]
async fn test_import_without_exports_is_fatal() {
    let empty = tempfile::tempdir().unwrap();
    let test = TestStore::new().await;
    let pipeline = Pipeline::new(test.store.clone(), test_config("http://localhost/query", &["BAC"]));

    let summary = pipeline.run_import(empty.path()).await;
    assert_matches!(summary.fatal, Some(PipelineError::Import(_)));
    assert_eq!(summary.exit_code(), 2);
}

#[test_log::test(tokio::test)]
async fn test_validate_only_on_fresh_store_is_clean() {
    let test = TestStore::new().await;
    let pipeline = Pipeline::new(test.store.clone(), test_config("http://localhost/query", &["BAC"]));

    let summary = pipeline.run_validate().await;
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.validation.unwrap().rows_checked, 0);
}
