use crate::domain::ticker::{Candle, OptionContract, OptionsSummary, TickerRecord};
use crate::market::provider::MarketDataProvider;
use crate::market::types::{HistoryBar, HistoryRequest, OptionChain, RawOptionContract};
use crate::time::iso::format_iso_utc;
use anyhow::Context;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub const HISTORY_DAYS: u32 = 60;
pub const TOP_CONTRACTS: usize = 5;

/// Why a ticker produced no record. Options and earnings never fail a ticker.
#[derive(Debug)]
pub enum NormalizeError {
    NoHistory,
    History(anyhow::Error),
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeError::NoHistory => write!(f, "no price history returned"),
            NormalizeError::History(err) => write!(f, "price history fetch failed: {err:#}"),
        }
    }
}

impl std::error::Error for NormalizeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NormalizeError::NoHistory => None,
            NormalizeError::History(err) => Some(&**err),
        }
    }
}

#[derive(Clone)]
pub struct TickerNormalizer {
    provider: Arc<dyn MarketDataProvider>,
    concurrency: usize,
}

impl TickerNormalizer {
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self {
            provider,
            concurrency: 1,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    /// Returns `None` when the ticker has no usable price history; the reason is logged.
    pub async fn normalize(&self, symbol: &str) -> Option<TickerRecord> {
        let symbol = symbol.trim();
        match self.try_normalize(symbol).await {
            Ok(record) => Some(record),
            Err(NormalizeError::NoHistory) => {
                tracing::warn!(ticker = %symbol, "no price history; skipping ticker");
                None
            }
            Err(err) => {
                tracing::error!(ticker = %symbol, error = %err, "failed to fetch ticker data");
                None
            }
        }
    }

    pub async fn try_normalize(&self, symbol: &str) -> Result<TickerRecord, NormalizeError> {
        let symbol = symbol.trim();
        let candles = self.fetch_candles(symbol).await?;

        let options = match self.fetch_options(symbol).await {
            Ok(summary) => summary,
            Err(err) => {
                let error = format!("{err:#}");
                tracing::warn!(ticker = %symbol, %error, "options unavailable; using empty summary");
                OptionsSummary::default()
            }
        };

        let earnings_date = match self.fetch_earnings_date(symbol).await {
            Ok(date) => date,
            Err(err) => {
                let error = format!("{err:#}");
                tracing::warn!(ticker = %symbol, %error, "earnings date unavailable");
                None
            }
        };

        let price = candles.last().map(|c| c.close).unwrap_or(0.0);

        Ok(TickerRecord {
            ticker: symbol.to_string(),
            price,
            candles,
            options,
            earnings_date,
            indicators: BTreeMap::new(),
        })
    }

    /// Normalizes every symbol, keeping input order and omitting the ones that failed.
    pub async fn normalize_all(&self, symbols: &[String]) -> Vec<TickerRecord> {
        let started = std::time::Instant::now();

        let pending: Vec<_> = symbols.iter().map(|symbol| self.normalize(symbol)).collect();
        let records: Vec<TickerRecord> = futures::stream::iter(pending)
            .buffered(self.concurrency)
            .filter_map(|record| async move { record })
            .collect()
            .await;

        tracing::info!(
            provider = self.provider.provider_name(),
            requested = symbols.len(),
            returned = records.len(),
            concurrency = self.concurrency,
            elapsed_ms = started.elapsed().as_millis(),
            "normalized tickers"
        );
        records
    }

    async fn fetch_candles(&self, symbol: &str) -> Result<Vec<Candle>, NormalizeError> {
        let bars = self
            .provider
            .fetch_history(symbol, &HistoryRequest::daily(HISTORY_DAYS))
            .await
            .map_err(NormalizeError::History)?;

        if bars.is_empty() {
            return Err(NormalizeError::NoHistory);
        }
        Ok(bars.into_iter().map(to_candle).collect())
    }

    async fn fetch_options(&self, symbol: &str) -> anyhow::Result<OptionsSummary> {
        let expiries = self
            .provider
            .fetch_option_expirations(symbol)
            .await
            .context("option expiry list")?;

        // Only the nearest expiry is summarized.
        let Some(&nearest) = expiries.first() else {
            return Ok(OptionsSummary::default());
        };

        let chain = self
            .provider
            .fetch_option_chain(symbol, nearest)
            .await
            .with_context(|| format!("option chain for expiry {}", format_iso_utc(nearest)))?;

        Ok(summarize_chain(chain))
    }

    async fn fetch_earnings_date(&self, symbol: &str) -> anyhow::Result<Option<String>> {
        let dates = self.provider.fetch_earnings_dates(symbol).await?;
        Ok(dates.first().copied().map(format_iso_utc))
    }
}

/// Splits `?tickers=` input on commas, trimming each symbol and dropping empty entries.
pub fn parse_ticker_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn to_candle(bar: HistoryBar) -> Candle {
    Candle {
        time: format_iso_utc(bar.time),
        open: bar.open,
        high: bar.high,
        low: bar.low,
        close: bar.close,
        volume: bar.volume,
    }
}

pub fn summarize_chain(chain: OptionChain) -> OptionsSummary {
    let calls = top_by_volume(chain.calls, TOP_CONTRACTS);
    let puts = top_by_volume(chain.puts, TOP_CONTRACTS);

    // Averaged before missing values are zero-filled, so gaps do not drag the mean down.
    let average_iv = average_implied_volatility(calls.iter().chain(puts.iter()));

    OptionsSummary {
        top_calls: calls.into_iter().map(to_contract).collect(),
        top_puts: puts.into_iter().map(to_contract).collect(),
        average_iv,
    }
}

fn top_by_volume(mut rows: Vec<RawOptionContract>, n: usize) -> Vec<RawOptionContract> {
    // Stable sort: equal volumes keep provider order, missing volume sorts last.
    rows.sort_by(|a, b| b.volume.cmp(&a.volume));
    rows.truncate(n);
    rows
}

fn average_implied_volatility<'a>(rows: impl Iterator<Item = &'a RawOptionContract>) -> f64 {
    let (sum, count) = rows
        .filter_map(|r| r.implied_volatility)
        .filter(|v| v.is_finite())
        .fold((0.0_f64, 0_u32), |(sum, count), v| (sum + v, count + 1));

    if count == 0 {
        0.0
    } else {
        sum / f64::from(count)
    }
}

fn to_contract(row: RawOptionContract) -> OptionContract {
    OptionContract {
        contract_symbol: row.contract_symbol.unwrap_or_else(|| "0".to_string()),
        strike: row.strike.unwrap_or(0.0),
        last_price: row.last_price.unwrap_or(0.0),
        volume: row.volume.unwrap_or(0),
        open_interest: row.open_interest.unwrap_or(0),
        implied_volatility: row.implied_volatility.unwrap_or(0.0),
        is_unusual: false,
    }
}
