use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Envelope returned by `GET /data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataResponse {
    pub tickers: Vec<TickerRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerRecord {
    pub ticker: String,
    pub price: f64,
    pub candles: Vec<Candle>,
    pub options: OptionsSummary,
    pub earnings_date: Option<String>,

    // Indicators are computed by the dashboard; the key stays so the client can fill it in.
    pub indicators: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionsSummary {
    #[serde(rename = "topCalls")]
    pub top_calls: Vec<OptionContract>,
    #[serde(rename = "topPuts")]
    pub top_puts: Vec<OptionContract>,
    #[serde(rename = "averageIV")]
    pub average_iv: f64,
}

impl Default for OptionsSummary {
    fn default() -> Self {
        Self {
            top_calls: Vec::new(),
            top_puts: Vec::new(),
            average_iv: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionContract {
    pub contract_symbol: String,
    pub strike: f64,
    pub last_price: f64,
    pub volume: u64,
    pub open_interest: u64,
    pub implied_volatility: f64,
    pub is_unusual: bool,
}
