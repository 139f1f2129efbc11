//! Alpha Vantage client against a mock HTTP server

use assert_matches::assert_matches;
use bank_fundamentals::api::{AlphaVantageClient, FetchError, StatementProvider};
use bank_fundamentals::models::StatementType;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{fixtures, test_config};

async fn client_for(server: &MockServer) -> AlphaVantageClient {
    let config = test_config(&format!("{}/query", server.uri()), &["BAC"]);
    AlphaVantageClient::new(&config).expect("Failed to create client")
}

#[test_log::test(tokio::test)]
async fn test_fetch_statement_sends_function_symbol_and_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .and(query_param("function", "BALANCE_SHEET"))
        .and(query_param("symbol", "BAC"))
        .and(query_param("apikey", "test-key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(fixtures::statement_response(StatementType::BalanceSheet, "BAC")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let payload = client.fetch_statement("BAC", StatementType::BalanceSheet).await.unwrap();

    assert_eq!(payload.symbol.as_deref(), Some("BAC"));
    assert_eq!(payload.table.rows.len(), 1);
    assert!(payload.table.headers.iter().any(|h| h == "totalShareholderEquity"));
}

#[test_log::test(tokio::test)]
async fn test_http_statuses_are_classified() {
    let server = MockServer::start().await;
    for (function, status) in [
        ("BALANCE_SHEET", 429),
        ("CASH_FLOW", 503),
        ("INCOME_STATEMENT", 401),
        ("OVERVIEW", 404),
    ] {
        Mock::given(method("GET"))
            .and(query_param("function", function))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
    }

    let client = client_for(&server).await;
    let mut outcomes = Vec::new();
    for statement_type in StatementType::ALL {
        outcomes.push(client.fetch_statement("BAC", statement_type).await.unwrap_err());
    }

    assert_matches!(outcomes[0], FetchError::RateLimited(_));
    assert_eq!(outcomes[1], FetchError::Server(503));
    assert_matches!(outcomes[2], FetchError::Auth(_));
    assert_eq!(outcomes[3], FetchError::Http(404));
    let transient: Vec<bool> = outcomes.iter().map(FetchError::is_transient).collect();
    assert_eq!(transient, vec![true, true, false, false]);
}

#[test_log::test(tokio::test)]
async fn test_body_notices_and_garbage() {
    let server = MockServer::start().await;
    Mock::given(query_param("function", "CASH_FLOW"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Information": "Thank you for using Alpha Vantage! Please consider spreading out your free API requests more sparingly (1 request per second)."
        })))
        .mount(&server)
        .await;
    Mock::given(query_param("function", "OVERVIEW"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(query_param("function", "INCOME_STATEMENT"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;

    // Throttling notices arrive with HTTP 200
    assert_matches!(
        client.fetch_statement("BAC", StatementType::CashFlow).await,
        Err(FetchError::RateLimited(_))
    );
    assert!(client.fetch_statement("ZZZZ", StatementType::Overview).await.unwrap().is_empty());
    assert_matches!(
        client.fetch_statement("BAC", StatementType::IncomeStatement).await,
        Err(FetchError::Malformed(_))
    );
}
