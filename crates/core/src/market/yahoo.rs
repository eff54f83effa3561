use crate::config::Settings;
use crate::market::provider::MarketDataProvider;
use crate::market::types::{HistoryBar, HistoryRequest, OptionChain};
use crate::time::iso::{from_unix_secs, session_date_midnight};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";
const DEFAULT_COOKIE_URL: &str = "https://fc.yahoo.com";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

// Chart error code Yahoo uses for unknown or delisted symbols.
const NOT_FOUND_CODE: &str = "Not Found";

#[derive(Debug)]
pub struct YahooClient {
    http: reqwest::Client,
    base_url: String,
    cookie_url: String,

    // Options and quoteSummary require a crumb bound to the session cookie. Cached per process.
    crumb_cache: tokio::sync::Mutex<Option<String>>,
}

impl YahooClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings
            .yahoo_base_url
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let cookie_url = settings
            .yahoo_cookie_url
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_COOKIE_URL.to_string());

        let timeout_secs = std::env::var("YAHOO_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self::new(base_url, cookie_url, Duration::from_secs(timeout_secs))
    }

    pub fn new(
        base_url: impl Into<String>,
        cookie_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static(BROWSER_USER_AGENT),
        );

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .cookie_store(true)
            .build()
            .context("failed to build Yahoo http client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            cookie_url: cookie_url.into(),
            crumb_cache: tokio::sync::Mutex::new(None),
        })
    }

    /// Appends `segments` to the base URL, each escaped as a single path segment.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("invalid Yahoo base url: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Yahoo base url cannot have a path: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn symbol_url(&self, prefix: &[&str], symbol: &str) -> Result<Url> {
        // The url crate silently drops dot segments, which would address the parent resource.
        anyhow::ensure!(
            !symbol.is_empty() && symbol != "." && symbol != "..",
            "invalid ticker symbol: {symbol:?}"
        );
        let mut segments = prefix.to_vec();
        segments.push(symbol);
        self.url(&segments)
    }

    async fn get_json(&self, url: Url, query: &[(&str, String)]) -> Result<(StatusCode, Value)> {
        let res = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .context("Yahoo request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Yahoo response")?;

        match serde_json::from_str::<Value>(&text) {
            Ok(raw) => Ok((status, raw)),
            // Error pages are not always JSON; callers decide from the status.
            Err(_) if !status.is_success() => Ok((status, Value::String(text))),
            Err(err) => Err(err).with_context(|| format!("Yahoo response is not valid JSON: {text}")),
        }
    }

    async fn crumb(&self) -> Result<String> {
        let mut guard = self.crumb_cache.lock().await;
        if let Some(crumb) = guard.as_ref() {
            return Ok(crumb.clone());
        }

        let crumb = self.fetch_crumb().await?;
        *guard = Some(crumb.clone());
        Ok(crumb)
    }

    async fn fetch_crumb(&self) -> Result<String> {
        // The cookie endpoint typically answers 404; only the Set-Cookie header matters.
        self.http
            .get(&self.cookie_url)
            .send()
            .await
            .context("Yahoo cookie request failed")?;

        let res = self
            .http
            .get(self.url(&["v1", "test", "getcrumb"])?)
            .send()
            .await
            .context("Yahoo crumb request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Yahoo crumb response")?;
        if !status.is_success() {
            anyhow::bail!("Yahoo crumb HTTP {status}: {text}");
        }

        let crumb = text.trim().to_string();
        anyhow::ensure!(
            !crumb.is_empty() && !crumb.contains('<') && !crumb.contains(' '),
            "Yahoo returned an unusable crumb: {crumb}"
        );
        tracing::debug!("obtained Yahoo crumb");
        Ok(crumb)
    }

    async fn get_json_with_crumb(&self, url: Url, mut query: Vec<(&str, String)>) -> Result<Value> {
        let crumb = self.crumb().await?;
        query.push(("crumb", crumb));

        let (status, raw) = self.get_json(url, &query).await?;
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            *self.crumb_cache.lock().await = None;
            anyhow::bail!("Yahoo rejected crumb (HTTP {status}); it will be refreshed on the next call");
        }
        // 404 still carries a structured error body that the parsers report.
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            anyhow::bail!("Yahoo HTTP {status}: {raw}");
        }
        Ok(raw)
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for YahooClient {
    fn provider_name(&self) -> &'static str {
        "yahoo_finance"
    }

    async fn fetch_history(&self, symbol: &str, req: &HistoryRequest) -> Result<Vec<HistoryBar>> {
        let url = self.symbol_url(&["v8", "finance", "chart"], symbol)?;
        let query = [
            ("range", req.range.clone()),
            ("interval", req.interval.clone()),
            ("includePrePost", "false".to_string()),
            ("events", "div,splits".to_string()),
        ];

        let (status, raw) = self.get_json(url, &query).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            anyhow::bail!("Yahoo chart HTTP {status}: {raw}");
        }

        parse_chart(raw, &req.interval).with_context(|| format!("failed to parse chart for {symbol}"))
    }

    async fn fetch_option_expirations(&self, symbol: &str) -> Result<Vec<DateTime<Utc>>> {
        let url = self.symbol_url(&["v7", "finance", "options"], symbol)?;
        let raw = self.get_json_with_crumb(url, Vec::new()).await?;
        parse_expirations(raw).with_context(|| format!("failed to parse option expiries for {symbol}"))
    }

    async fn fetch_option_chain(&self, symbol: &str, expiry: DateTime<Utc>) -> Result<OptionChain> {
        let url = self.symbol_url(&["v7", "finance", "options"], symbol)?;
        let raw = self
            .get_json_with_crumb(url, vec![("date", expiry.timestamp().to_string())])
            .await?;
        parse_option_chain(raw).with_context(|| format!("failed to parse option chain for {symbol}"))
    }

    async fn fetch_earnings_dates(&self, symbol: &str) -> Result<Vec<DateTime<Utc>>> {
        let url = self.symbol_url(&["v10", "finance", "quoteSummary"], symbol)?;
        let raw = self
            .get_json_with_crumb(url, vec![("modules", "calendarEvents".to_string())])
            .await?;
        parse_earnings_dates(raw).with_context(|| format!("failed to parse earnings dates for {symbol}"))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct YahooError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

impl YahooError {
    fn is_not_found(&self) -> bool {
        self.code == NOT_FOUND_CODE
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Clone, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<YahooError>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    #[serde(default)]
    indicators: ChartIndicators,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChartMeta {
    #[serde(default, rename = "gmtoffset")]
    gmt_offset: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

fn at(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten()
}

fn is_daily_or_coarser(interval: &str) -> bool {
    interval.ends_with('d') || interval.ends_with("wk") || interval.ends_with("mo")
}

pub(crate) fn parse_chart(raw: Value, interval: &str) -> Result<Vec<HistoryBar>> {
    let envelope = serde_json::from_value::<ChartEnvelope>(raw)
        .context("failed to decode Yahoo chart response")?;

    if let Some(err) = envelope.chart.error {
        if err.is_not_found() {
            return Ok(Vec::new());
        }
        anyhow::bail!("Yahoo chart error {}: {}", err.code, err.description);
    }

    let Some(result) = envelope.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(Vec::new());
    };
    let Some(quote) = result.indicators.quote.first() else {
        return Ok(Vec::new());
    };

    let daily = is_daily_or_coarser(interval);

    let mut out = Vec::with_capacity(result.timestamp.len());
    for (i, &ts) in result.timestamp.iter().enumerate() {
        // Rows with a missing price are placeholders for sessions that have not traded yet.
        let (Some(open), Some(high), Some(low), Some(close)) = (
            at(&quote.open, i),
            at(&quote.high, i),
            at(&quote.low, i),
            at(&quote.close, i),
        ) else {
            continue;
        };

        let time = if daily {
            session_date_midnight(ts, result.meta.gmt_offset)
        } else {
            from_unix_secs(ts)
        };
        let time = time.with_context(|| format!("timestamp out of range: {ts}"))?;

        let volume = at(&quote.volume, i)
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v.round() as u64)
            .unwrap_or(0);

        out.push(HistoryBar {
            time,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    // Yahoo occasionally repeats the live session as an extra trailing bar on the same date.
    out.dedup_by(|later, earlier| {
        if later.time != earlier.time {
            return false;
        }
        *earlier = later.clone();
        true
    });

    Ok(out)
}

#[derive(Debug, Clone, Deserialize)]
struct OptionsEnvelope {
    #[serde(rename = "optionChain")]
    option_chain: OptionsBody,
}

#[derive(Debug, Clone, Deserialize)]
struct OptionsBody {
    #[serde(default)]
    result: Option<Vec<OptionsResult>>,
    #[serde(default)]
    error: Option<YahooError>,
}

#[derive(Debug, Clone, Deserialize)]
struct OptionsResult {
    #[serde(default, rename = "expirationDates")]
    expiration_dates: Vec<i64>,
    #[serde(default)]
    options: Vec<OptionChain>,
}

fn decode_options(raw: Value) -> Result<Option<OptionsResult>> {
    let envelope = serde_json::from_value::<OptionsEnvelope>(raw)
        .context("failed to decode Yahoo options response")?;

    if let Some(err) = envelope.option_chain.error {
        if err.is_not_found() {
            return Ok(None);
        }
        anyhow::bail!("Yahoo options error {}: {}", err.code, err.description);
    }

    Ok(envelope.option_chain.result.and_then(|r| r.into_iter().next()))
}

pub(crate) fn parse_expirations(raw: Value) -> Result<Vec<DateTime<Utc>>> {
    let Some(result) = decode_options(raw)? else {
        return Ok(Vec::new());
    };
    Ok(result
        .expiration_dates
        .into_iter()
        .filter_map(from_unix_secs)
        .collect())
}

pub(crate) fn parse_option_chain(raw: Value) -> Result<OptionChain> {
    let Some(result) = decode_options(raw)? else {
        return Ok(OptionChain::default());
    };
    Ok(result.options.into_iter().next().unwrap_or_default())
}

#[derive(Debug, Clone, Deserialize)]
struct QuoteSummaryEnvelope {
    #[serde(rename = "quoteSummary")]
    quote_summary: QuoteSummaryBody,
}

#[derive(Debug, Clone, Deserialize)]
struct QuoteSummaryBody {
    #[serde(default)]
    result: Option<Vec<QuoteSummaryResult>>,
    #[serde(default)]
    error: Option<YahooError>,
}

#[derive(Debug, Clone, Deserialize)]
struct QuoteSummaryResult {
    #[serde(default, rename = "calendarEvents")]
    calendar_events: Option<CalendarEvents>,
}

#[derive(Debug, Clone, Deserialize)]
struct CalendarEvents {
    #[serde(default)]
    earnings: Option<CalendarEarnings>,
}

#[derive(Debug, Clone, Deserialize)]
struct CalendarEarnings {
    #[serde(default, rename = "earningsDate")]
    earnings_date: Vec<RawTimestamp>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawTimestamp {
    #[serde(default)]
    raw: Option<i64>,
}

pub(crate) fn parse_earnings_dates(raw: Value) -> Result<Vec<DateTime<Utc>>> {
    let envelope = serde_json::from_value::<QuoteSummaryEnvelope>(raw)
        .context("failed to decode Yahoo quoteSummary response")?;

    if let Some(err) = envelope.quote_summary.error {
        if err.is_not_found() {
            return Ok(Vec::new());
        }
        anyhow::bail!("Yahoo quoteSummary error {}: {}", err.code, err.description);
    }

    let dates = envelope
        .quote_summary
        .result
        .and_then(|r| r.into_iter().next())
        .and_then(|r| r.calendar_events)
        .and_then(|c| c.earnings)
        .map(|e| e.earnings_date)
        .unwrap_or_default();

    Ok(dates
        .into_iter()
        .filter_map(|d| d.raw)
        .filter_map(from_unix_secs)
        .collect())
}
