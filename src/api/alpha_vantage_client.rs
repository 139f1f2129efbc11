use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{ApiRateLimiter, FetchError, StatementProvider};
use crate::models::{Config, ConfigError, RawPayload, RawTable, ReportPeriod, StatementType};

/// Alpha Vantage fundamentals client
pub struct AlphaVantageClient {
    client: Client,
    api_key: String,
    base_url: Url,
    report_period: ReportPeriod,
    rate_limiter: ApiRateLimiter,
}

impl std::fmt::Debug for AlphaVantageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlphaVantageClient")
            .field("base_url", &self.base_url.as_str())
            .field("report_period", &self.report_period)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl AlphaVantageClient {
    /// Create a new client. A missing API key is a configuration error.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let api_key = config.require_api_key()?.to_string();
        let base_url = Url::parse(&config.base_url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("bank-fundamentals/0.1")
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                var: "ALPHA_VANTAGE_BASE_URL",
                value: config.base_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url,
            report_period: config.report_period,
            rate_limiter: ApiRateLimiter::new(config.rate_limit_per_minute),
        })
    }

    fn request_url(&self, symbol: &str, statement_type: StatementType) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("function", statement_type.api_function())
            .append_pair("symbol", symbol)
            .append_pair("apikey", &self.api_key);
        url
    }

    async fn get_json(&self, symbol: &str, statement_type: StatementType) -> Result<Value, FetchError> {
        self.rate_limiter.wait().await;

        debug!("Fetching {} for {} from Alpha Vantage", statement_type.api_function(), symbol);

        let response = self
            .client
            .get(self.request_url(symbol, statement_type))
            .send()
            .await
            .map_err(|e| FetchError::Network(e.without_url().to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited(format!("HTTP {}", status.as_u16())));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Auth(format!("HTTP {}", status.as_u16())));
        }
        if status.is_server_error() {
            return Err(FetchError::Server(status.as_u16()));
        }
        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }

        let text = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.without_url().to_string()))?;

        serde_json::from_str(&text).map_err(|e| {
            FetchError::Malformed(format!(
                "{} | Response: {}",
                e,
                text.chars().take(200).collect::<String>()
            ))
        })
    }
}

#[async_trait]
impl StatementProvider for AlphaVantageClient {
    async fn fetch_statement(
        &self,
        symbol: &str,
        statement_type: StatementType,
    ) -> Result<RawPayload, FetchError> {
        let body = self.get_json(symbol, statement_type).await?;
        let payload = payload_from_json(symbol, statement_type, self.report_period, &body)?;
        if payload.is_empty() {
            warn!("No {} data returned for {}", statement_type, symbol);
        }
        Ok(payload)
    }
}

/// Turn a decoded response into a raw payload, separating upstream notices
/// (rate limits, bad credentials) from the "no data for symbol" case.
pub fn payload_from_json(
    symbol: &str,
    statement_type: StatementType,
    period: ReportPeriod,
    body: &Value,
) -> Result<RawPayload, FetchError> {
    let object = body
        .as_object()
        .ok_or_else(|| FetchError::Malformed("expected a JSON object".to_string()))?;

    for notice_key in ["Note", "Information"] {
        if let Some(notice) = object.get(notice_key) {
            return Err(classify_notice(notice.as_str().unwrap_or_default()));
        }
    }

    if let Some(message) = object.get("Error Message") {
        let message = message.as_str().unwrap_or_default();
        if mentions_api_key(message) {
            return Err(FetchError::Auth(message.to_string()));
        }
        debug!("Upstream has no {} for {}: {}", statement_type, symbol, message);
        return Ok(RawPayload::empty(symbol, statement_type));
    }

    let table = match statement_type {
        StatementType::Overview if object.is_empty() => RawTable::default(),
        StatementType::Overview => RawTable::from_json_objects([object]),
        _ => match object.get(period.json_key()) {
            Some(Value::Array(reports)) => RawTable::from_json_objects(reports.iter().filter_map(Value::as_object)),
            Some(_) => {
                return Err(FetchError::Malformed(format!("{} is not an array", period.json_key())));
            }
            None => RawTable::default(),
        },
    };

    Ok(RawPayload::from_api(symbol, statement_type, table))
}

const RATE_LIMIT_WORDING: [&str; 7] = [
    "call frequency",
    "rate limit",
    "per minute",
    "per second",
    "per day",
    "spreading out",
    "sparingly",
];

/// Only call-frequency notices are worth retrying; premium-only endpoints and
/// key problems are permanent for this run.
fn classify_notice(notice: &str) -> FetchError {
    let lower = notice.to_ascii_lowercase();
    if RATE_LIMIT_WORDING.iter().any(|w| lower.contains(w)) {
        FetchError::RateLimited(notice.to_string())
    } else if mentions_api_key(notice) || lower.contains("premium") {
        FetchError::Auth(notice.to_string())
    } else {
        FetchError::Malformed(format!("unrecognized notice: {}", notice))
    }
}

fn mentions_api_key(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("apikey") || lower.contains("api key")
}
