pub mod domain;
pub mod market;
pub mod time;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub mod config {
    use anyhow::Context;

    const DEFAULT_TICKER_CONCURRENCY: usize = 4;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub sentry_dsn: Option<String>,
        pub yahoo_base_url: Option<String>,
        pub yahoo_cookie_url: Option<String>,
        pub ticker_concurrency: Option<String>,
        pub static_dir: Option<String>,
        pub port: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                yahoo_base_url: std::env::var("YAHOO_BASE_URL").ok(),
                yahoo_cookie_url: std::env::var("YAHOO_COOKIE_URL").ok(),
                ticker_concurrency: std::env::var("TICKER_CONCURRENCY").ok(),
                static_dir: std::env::var("STATIC_DIR").ok(),
                port: std::env::var("PORT").ok(),
            })
        }

        /// Number of tickers normalized at once. `1` keeps requests strictly sequential.
        pub fn ticker_concurrency(&self) -> anyhow::Result<usize> {
            let Some(raw) = self.ticker_concurrency.as_deref() else {
                return Ok(DEFAULT_TICKER_CONCURRENCY);
            };
            let n = raw
                .trim()
                .parse::<usize>()
                .with_context(|| format!("TICKER_CONCURRENCY must be a positive integer (got {raw:?})"))?;
            anyhow::ensure!(n >= 1, "TICKER_CONCURRENCY must be >= 1");
            Ok(n)
        }

        pub fn port(&self, default: u16) -> u16 {
            self.port
                .as_deref()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        }

        pub fn static_dir(&self) -> &str {
            self.static_dir
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(".")
        }
    }

}
