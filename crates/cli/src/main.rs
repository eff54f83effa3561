use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tickerboard_core::config::Settings;
use tickerboard_core::domain::ticker::DataResponse;
use tickerboard_core::market::normalize::{parse_ticker_list, TickerNormalizer};
use tickerboard_core::market::yahoo::YahooClient;

/// Fetch and print the same JSON the `/data` endpoint serves.
#[derive(Debug, Parser)]
#[command(name = "tickerboard_cli")]
struct Args {
    /// Comma-separated ticker symbols, e.g. `AAPL,MSFT,TSLA`.
    #[arg(long)]
    tickers: String,

    /// Tickers fetched at once. Overrides TICKER_CONCURRENCY.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    concurrency: Option<u64>,

    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let symbols = parse_ticker_list(&args.tickers);
    anyhow::ensure!(!symbols.is_empty(), "--tickers must name at least one symbol");

    let concurrency = match args.concurrency {
        Some(n) => usize::try_from(n).context("--concurrency is too large")?,
        None => settings.ticker_concurrency()?,
    };

    let client = YahooClient::from_settings(&settings).map_err(|e| {
        sentry_anyhow::capture_anyhow(&e);
        e
    })?;
    let normalizer = TickerNormalizer::new(Arc::new(client)).with_concurrency(concurrency);

    let tickers = normalizer.normalize_all(&symbols).await;
    if tickers.len() < symbols.len() {
        tracing::warn!(
            requested = symbols.len(),
            returned = tickers.len(),
            "some tickers were omitted; see earlier log lines"
        );
    }

    let response = DataResponse { tickers };
    let out = if args.pretty {
        serde_json::to_string_pretty(&response)
    } else {
        serde_json::to_string(&response)
    }
    .context("serialize response failed")?;
    println!("{out}");

    Ok(())
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
