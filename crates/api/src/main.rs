use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tickerboard_core::config::Settings;
use tickerboard_core::domain::ticker::DataResponse;
use tickerboard_core::market::normalize::{parse_ticker_list, TickerNormalizer};
use tickerboard_core::market::yahoo::YahooClient;

// The dashboard client points at this port by default.
const DEFAULT_PORT: u16 = 8501;

const NO_TICKERS_MESSAGE: &str = "No tickers provided in ?tickers=... parameter";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let normalizer = match build_normalizer(&settings) {
        Ok(n) => n,
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "failed to build market data client");
            return Err(e);
        }
    };

    let static_dir = settings.static_dir().to_string();
    let app = router(AppState { normalizer }, &static_dir);

    let port = settings.port(DEFAULT_PORT);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, %static_dir, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn build_normalizer(settings: &Settings) -> anyhow::Result<TickerNormalizer> {
    let client = YahooClient::from_settings(settings)?;
    Ok(TickerNormalizer::new(Arc::new(client)).with_concurrency(settings.ticker_concurrency()?))
}

fn router(state: AppState, static_dir: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/data", get(get_data))
        .fallback_service(ServeDir::new(static_dir))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    normalizer: TickerNormalizer,
}

#[derive(Debug, Deserialize)]
struct DataQuery {
    tickers: Option<String>,
}

async fn get_data(
    State(state): State<AppState>,
    Query(query): Query<DataQuery>,
) -> Result<Json<DataResponse>, ApiError> {
    let raw = query
        .tickers
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest(NO_TICKERS_MESSAGE.to_string()))?;

    let symbols = parse_ticker_list(raw);
    let tickers = state.normalizer.normalize_all(&symbols).await;

    Ok(Json(DataResponse { tickers }))
}

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };
        tracing::debug!(%status, %error, "rejecting request");
        (status, Json(ErrorBody { error })).into_response()
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tickerboard_core::market::types::OptionChain;
    use tickerboard_core::testing::{contract, daily_bars, ts, StaticProvider, StaticTicker};
    use tower::ServiceExt;

    fn app_with(provider: StaticProvider, static_dir: &str) -> Router {
        let normalizer = TickerNormalizer::new(Arc::new(provider)).with_concurrency(2);
        router(AppState { normalizer }, static_dir)
    }

    fn aapl() -> StaticTicker {
        StaticTicker {
            history: daily_bars(&[191.25]),
            expirations: vec![ts(2024, 1, 19)],
            chain: OptionChain {
                calls: vec![contract("AAPL240119C00190000", Some(700), Some(0.22))],
                puts: vec![contract("AAPL240119P00190000", Some(300), Some(0.26))],
            },
            earnings_dates: vec![ts(2024, 2, 1)],
            ..StaticTicker::default()
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let res = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn missing_tickers_is_bad_request() {
        let app = app_with(StaticProvider::new(), ".");
        let (status, body) = get_json(app, "/data").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": NO_TICKERS_MESSAGE}));
    }

    #[tokio::test]
    async fn blank_tickers_is_bad_request() {
        let app = app_with(StaticProvider::new(), ".");
        let (status, body) = get_json(app, "/data?tickers=%20").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn single_ticker_price_is_last_close() {
        let app = app_with(StaticProvider::new().with_ticker("AAPL", aapl()), ".");
        let (status, body) = get_json(app, "/data?tickers=AAPL").await;
        assert_eq!(status, StatusCode::OK);

        let tickers = body["tickers"].as_array().unwrap();
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0]["ticker"], json!("AAPL"));
        assert_eq!(tickers[0]["price"], json!(191.25));
        assert_eq!(tickers[0]["candles"].as_array().unwrap().len(), 1);
        assert_eq!(tickers[0]["indicators"], json!({}));
        assert_eq!(tickers[0]["earningsDate"], json!("2024-02-01T00:00:00.000000Z"));
        assert_eq!(tickers[0]["options"]["topCalls"][0]["isUnusual"], json!(false));
        let avg = tickers[0]["options"]["averageIV"].as_f64().unwrap();
        assert!((avg - 0.24).abs() < 1e-12);
    }

    #[tokio::test]
    async fn unknown_tickers_are_silently_omitted() {
        let app = app_with(StaticProvider::new().with_ticker("AAPL", aapl()), ".");
        let (status, body) = get_json(app, "/data?tickers=AAPL,BOGUS123").await;
        assert_eq!(status, StatusCode::OK);

        let tickers = body["tickers"].as_array().unwrap();
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0]["ticker"], json!("AAPL"));
    }

    #[tokio::test]
    async fn only_separators_returns_empty_list() {
        let app = app_with(StaticProvider::new(), ".");
        let (status, body) = get_json(app, "/data?tickers=,,").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"tickers": []}));
    }

    #[tokio::test]
    async fn healthz_and_cors() {
        let app = app_with(StaticProvider::new(), ".");
        let res = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header("origin", "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
    }

    #[tokio::test]
    async fn serves_index_and_static_assets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>dashboard</html>").unwrap();
        std::fs::write(dir.path().join("App.tsx"), "export default {}").unwrap();
        let static_dir = dir.path().to_str().unwrap().to_string();

        let app = app_with(StaticProvider::new(), &static_dir);
        for (uri, expected) in [("/", "<html>dashboard</html>"), ("/App.tsx", "export default {}")] {
            let res = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK, "{uri}");
            let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
                .await
                .unwrap();
            assert_eq!(&bytes[..], expected.as_bytes());
        }

        let res = app
            .oneshot(Request::builder().uri("/missing.css").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
