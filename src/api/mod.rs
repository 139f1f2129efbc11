use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use thiserror::Error;

use crate::models::{RawPayload, StatementType};

pub mod alpha_vantage_client;
pub use alpha_vantage_client::AlphaVantageClient;

/// Why a single upstream request failed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("rate limited by upstream: {0}")]
    RateLimited(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream server error (HTTP {0})")]
    Server(u16),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("unexpected HTTP status {0}")]
    Http(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Transient failures are retried with backoff; the rest fail the pair immediately
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited(_) | FetchError::Network(_) | FetchError::Server(_)
        )
    }
}

/// Client-side rate limiter shared by every fetch worker
pub struct ApiRateLimiter {
    limiter: DefaultDirectRateLimiter,
}

impl std::fmt::Debug for ApiRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRateLimiter").finish_non_exhaustive()
    }
}

impl ApiRateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        // No burst: requests are spaced evenly across the minute
        let quota = Quota::per_minute(per_minute).allow_burst(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(quota),
        }
    }

    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }
}

/// Source of raw statement payloads, one call per (symbol, statement type)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatementProvider: Send + Sync {
    async fn fetch_statement(
        &self,
        symbol: &str,
        statement_type: StatementType,
    ) -> Result<RawPayload, FetchError>;
}
