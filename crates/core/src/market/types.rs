use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Lookback window and bar size for a history request, in the provider's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub range: String,
    pub interval: String,
}

impl HistoryRequest {
    pub fn daily(days: u32) -> Self {
        Self {
            range: format!("{days}d"),
            interval: "1d".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryBar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// One options-chain row as the provider returned it. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOptionContract {
    #[serde(default)]
    pub contract_symbol: Option<String>,
    #[serde(default)]
    pub strike: Option<f64>,
    #[serde(default)]
    pub last_price: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_count")]
    pub volume: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_count")]
    pub open_interest: Option<u64>,
    #[serde(default)]
    pub implied_volatility: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionChain {
    #[serde(default)]
    pub calls: Vec<RawOptionContract>,
    #[serde(default)]
    pub puts: Vec<RawOptionContract>,
}

// Counts occasionally arrive as floats (`12.0`); anything negative or non-finite is treated as missing.
fn de_opt_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let n: Option<serde_json::Number> = Option::deserialize(deserializer)?;
    Ok(n.and_then(|n| {
        n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f.round() as u64)
        })
    }))
}
