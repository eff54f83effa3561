use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tickerboard_core::market::normalize::{parse_ticker_list, TickerNormalizer};
use tickerboard_core::market::yahoo::YahooClient;

const EXPIRY_NEAR: i64 = 1_705_622_400; // 2024-01-19
const EXPIRY_FAR: i64 = 1_706_227_200; // 2024-01-26

#[derive(Clone)]
struct MockState {
    crumb: &'static str,
}

async fn cookie() -> Response {
    (
        StatusCode::NOT_FOUND,
        [("set-cookie", "A3=mock-session; Path=/")],
        "not found",
    )
        .into_response()
}

async fn crumb(State(state): State<MockState>) -> &'static str {
    state.crumb
}

fn has_valid_crumb(q: &HashMap<String, String>) -> bool {
    q.get("crumb").map(String::as_str) == Some("good-crumb")
}

async fn chart(Path(symbol): Path<String>, Query(q): Query<HashMap<String, String>>) -> Response {
    if symbol != "AAPL" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({
                "chart": {
                    "result": null,
                    "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}
                }
            })),
        )
            .into_response();
    }

    assert_eq!(q.get("range").map(String::as_str), Some("60d"));
    assert_eq!(q.get("interval").map(String::as_str), Some("1d"));

    Json(json!({
        "chart": {
            "result": [{
                "meta": {"symbol": "AAPL", "gmtoffset": -18000},
                "timestamp": [1704205800, 1704292200],
                "indicators": {
                    "quote": [{
                        "open": [187.15, 184.22],
                        "high": [188.44, 185.88],
                        "low": [183.89, 183.43],
                        "close": [185.64, 184.25],
                        "volume": [82488700, 58414500]
                    }]
                }
            }],
            "error": null
        }
    }))
    .into_response()
}

async fn options(Path(symbol): Path<String>, Query(q): Query<HashMap<String, String>>) -> Response {
    if !has_valid_crumb(&q) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"finance": {"result": null, "error": {"code": "Unauthorized", "description": "Invalid Crumb"}}})),
        )
            .into_response();
    }
    assert_eq!(symbol, "AAPL");

    // The nearest expiry is the only chain that should be requested.
    let date = q.get("date").map(String::as_str);
    assert!(date.is_none() || date == Some("1705622400"), "unexpected chain date {date:?}");

    Json(json!({
        "optionChain": {
            "result": [{
                "underlyingSymbol": "AAPL",
                "expirationDates": [EXPIRY_NEAR, EXPIRY_FAR],
                "options": [{
                    "expirationDate": EXPIRY_NEAR,
                    "calls": [
                        {"contractSymbol": "AAPL240119C00180000", "strike": 180.0, "lastPrice": 6.1,
                         "volume": 1200, "openInterest": 5000, "impliedVolatility": 0.2},
                        {"contractSymbol": "AAPL240119C00190000", "strike": 190.0, "lastPrice": 0.9,
                         "volume": 4000, "impliedVolatility": 0.4}
                    ],
                    "puts": [
                        {"contractSymbol": "AAPL240119P00180000", "strike": 180.0, "lastPrice": 0.4,
                         "volume": 300, "openInterest": 900}
                    ]
                }]
            }],
            "error": null
        }
    }))
    .into_response()
}

async fn quote_summary(Query(q): Query<HashMap<String, String>>) -> Response {
    if !has_valid_crumb(&q) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    assert_eq!(q.get("modules").map(String::as_str), Some("calendarEvents"));

    Json(json!({
        "quoteSummary": {
            "result": [{
                "calendarEvents": {
                    "earnings": {"earningsDate": [{"raw": 1706821200, "fmt": "2024-02-01"}]}
                }
            }],
            "error": null
        }
    }))
    .into_response()
}

async fn spawn_mock(crumb_value: &'static str) -> String {
    let app = Router::new()
        .route("/cookie", get(cookie))
        .route("/v1/test/getcrumb", get(crumb))
        .route("/v8/finance/chart/:symbol", get(chart))
        .route("/v7/finance/options/:symbol", get(options))
        .route("/v10/finance/quoteSummary/:symbol", get(quote_summary))
        .with_state(MockState { crumb: crumb_value });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn normalizer_for(base: &str) -> TickerNormalizer {
    let client = YahooClient::new(base, format!("{base}/cookie"), Duration::from_secs(5)).unwrap();
    TickerNormalizer::new(Arc::new(client)).with_concurrency(2)
}

#[tokio::test]
async fn normalizes_from_yahoo_shaped_responses() {
    let base = spawn_mock("good-crumb").await;
    let normalizer = normalizer_for(&base);

    let records = normalizer
        .normalize_all(&parse_ticker_list("AAPL,BOGUS123"))
        .await;
    assert_eq!(records.len(), 1);

    let aapl = &records[0];
    assert_eq!(aapl.ticker, "AAPL");
    assert_eq!(aapl.price, 184.25);
    assert_eq!(aapl.candles.len(), 2);
    assert_eq!(aapl.candles[0].time, "2024-01-02T00:00:00.000000Z");
    assert_eq!(aapl.candles[1].volume, 58_414_500);

    let calls: Vec<_> = aapl
        .options
        .top_calls
        .iter()
        .map(|c| c.contract_symbol.as_str())
        .collect();
    assert_eq!(calls, ["AAPL240119C00190000", "AAPL240119C00180000"]);
    assert_eq!(aapl.options.top_calls[0].open_interest, 0);
    assert_eq!(aapl.options.top_puts.len(), 1);
    assert_eq!(aapl.options.top_puts[0].implied_volatility, 0.0);
    // The put has no IV, so only the two calls are averaged.
    assert!((aapl.options.average_iv - 0.3).abs() < 1e-12);

    assert_eq!(
        aapl.earnings_date.as_deref(),
        Some("2024-02-01T21:00:00.000000Z")
    );
}

#[tokio::test]
async fn rejected_crumb_degrades_options_and_earnings_only() {
    let base = spawn_mock("stale-crumb").await;
    let normalizer = normalizer_for(&base);

    let record = normalizer.normalize("AAPL").await.unwrap();
    assert_eq!(record.candles.len(), 2);
    assert!(record.options.top_calls.is_empty());
    assert!(record.options.top_puts.is_empty());
    assert_eq!(record.options.average_iv, 0.0);
    assert_eq!(record.earnings_date, None);
}

#[tokio::test]
async fn symbols_with_url_syntax_do_not_resolve_to_other_tickers() {
    let base = spawn_mock("good-crumb").await;
    let normalizer = normalizer_for(&base);

    for symbol in ["AAPL#junk", "BOGUS/../AAPL", "AAPL?x=1", ".."] {
        assert!(
            normalizer.normalize(symbol).await.is_none(),
            "{symbol} should be omitted"
        );
    }

    let records = normalizer
        .normalize_all(&parse_ticker_list("AAPL#junk,AAPL,BOGUS/../AAPL"))
        .await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].ticker, "AAPL");
}
