//! In-memory `MarketDataProvider` for tests. Unknown symbols behave like delisted tickers.

use crate::market::provider::MarketDataProvider;
use crate::market::types::{HistoryBar, HistoryRequest, OptionChain, RawOptionContract};
use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct StaticTicker {
    pub history: Vec<HistoryBar>,
    pub history_error: Option<String>,
    pub expirations: Vec<DateTime<Utc>>,
    pub chain: OptionChain,
    pub options_error: Option<String>,
    pub earnings_dates: Vec<DateTime<Utc>>,
    pub earnings_error: Option<String>,
    pub delay: Option<std::time::Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    tickers: HashMap<String, StaticTicker>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ticker(mut self, symbol: &str, ticker: StaticTicker) -> Self {
        self.tickers.insert(symbol.to_string(), ticker);
        self
    }

    /// Provider calls in the order they were made, e.g. `history:AAPL`, `chain:AAPL:1705622400`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn ticker(&self, symbol: &str) -> Option<&StaticTicker> {
        self.tickers.get(symbol)
    }
}

fn fail_if(err: &Option<String>) -> Result<()> {
    match err {
        Some(msg) => Err(anyhow::anyhow!(msg.clone())),
        None => Ok(()),
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for StaticProvider {
    fn provider_name(&self) -> &'static str {
        "static"
    }

    async fn fetch_history(&self, symbol: &str, _req: &HistoryRequest) -> Result<Vec<HistoryBar>> {
        self.record(format!("history:{symbol}"));
        let Some(t) = self.ticker(symbol) else {
            return Ok(Vec::new());
        };
        if let Some(delay) = t.delay {
            tokio::time::sleep(delay).await;
        }
        fail_if(&t.history_error)?;
        Ok(t.history.clone())
    }

    async fn fetch_option_expirations(&self, symbol: &str) -> Result<Vec<DateTime<Utc>>> {
        self.record(format!("expirations:{symbol}"));
        let Some(t) = self.ticker(symbol) else {
            return Ok(Vec::new());
        };
        fail_if(&t.options_error)?;
        Ok(t.expirations.clone())
    }

    async fn fetch_option_chain(&self, symbol: &str, expiry: DateTime<Utc>) -> Result<OptionChain> {
        self.record(format!("chain:{symbol}:{}", expiry.timestamp()));
        let Some(t) = self.ticker(symbol) else {
            return Ok(OptionChain::default());
        };
        fail_if(&t.options_error)?;
        Ok(t.chain.clone())
    }

    async fn fetch_earnings_dates(&self, symbol: &str) -> Result<Vec<DateTime<Utc>>> {
        self.record(format!("earnings:{symbol}"));
        let Some(t) = self.ticker(symbol) else {
            return Ok(Vec::new());
        };
        fail_if(&t.earnings_error)?;
        Ok(t.earnings_dates.clone())
    }
}

/// Consecutive daily bars starting 2024-01-02, one per close.
pub fn daily_bars(closes: &[f64]) -> Vec<HistoryBar> {
    let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).single().unwrap_or_default();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| HistoryBar {
            time: start + Duration::days(i as i64),
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 1_000 * (i as u64 + 1),
        })
        .collect()
}

pub fn contract(symbol: &str, volume: Option<u64>, iv: Option<f64>) -> RawOptionContract {
    RawOptionContract {
        contract_symbol: Some(symbol.to_string()),
        strike: Some(100.0),
        last_price: Some(1.5),
        volume,
        open_interest: Some(10),
        implied_volatility: iv,
    }
}

pub fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).single().unwrap_or_default()
}
