use crate::market::types::{HistoryBar, HistoryRequest, OptionChain};
use anyhow::Result;
use chrono::{DateTime, Utc};

#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Bars in chronological order. An unknown symbol yields an empty list, not an error.
    async fn fetch_history(&self, symbol: &str, req: &HistoryRequest) -> Result<Vec<HistoryBar>>;

    /// Listed option expiries, nearest first.
    async fn fetch_option_expirations(&self, symbol: &str) -> Result<Vec<DateTime<Utc>>>;

    async fn fetch_option_chain(&self, symbol: &str, expiry: DateTime<Utc>) -> Result<OptionChain>;

    /// Scheduled earnings dates in the order the provider lists them.
    async fn fetch_earnings_dates(&self, symbol: &str) -> Result<Vec<DateTime<Utc>>>;
}
