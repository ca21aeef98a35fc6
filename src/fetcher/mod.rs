pub mod http_client;
pub mod yahoo;

use crate::loader::DATE_COLUMN;
use crate::models::{DailyBar, PRICE_FIELDS};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::info;

pub use self::yahoo::YahooSource;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("cannot write {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable source of daily price history.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Daily bars for `symbol` from `start` through `end` (inclusive),
    /// ascending by date.
    async fn fetch_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>, FetchError>;
}

// ── CSV download ──────────────────────────────────────────────────────────────

fn cell(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "null".to_string())
}

/// Write bars in the site's download layout:
/// `Date,Open,High,Low,Close,Adj Close,Volume`, missing values as `null`.
pub fn write_price_csv(path: &Path, bars: &[DailyBar]) -> Result<(), FetchError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(std::iter::once(DATE_COLUMN).chain(PRICE_FIELDS))?;

    for bar in bars {
        writer.write_record([
            bar.date.format("%Y-%m-%d").to_string(),
            cell(bar.open),
            cell(bar.high),
            cell(bar.low),
            cell(bar.close),
            cell(bar.adj_close),
            bar.volume
                .map(|v| v.to_string())
                .unwrap_or_else(|| "null".to_string()),
        ])?;
    }

    writer.flush().map_err(|source| FetchError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Download one `<term>.csv` per search term into `raw_csv_dir`.
///
/// Terms are fetched in order; the first failure aborts the whole download.
/// Files written before the failure are left in place.
pub async fn download_csv(
    source: &dyn MarketDataSource,
    raw_csv_dir: &Path,
    search_terms: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<PathBuf>, FetchError> {
    std::fs::create_dir_all(raw_csv_dir).map_err(|source| FetchError::Io {
        path: raw_csv_dir.to_path_buf(),
        source,
    })?;

    info!(
        "Downloading {} series from {} ({} to {})",
        search_terms.len(),
        source.name(),
        start,
        end
    );

    let mut written = Vec::with_capacity(search_terms.len());
    for term in search_terms {
        let bars = source.fetch_daily_bars(term, start, end).await?;

        let path = raw_csv_dir.join(format!("{term}.csv"));
        write_price_csv(&path, &bars)?;
        info!("{}: {} bars → {:?}", term, bars.len(), path);

        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory source serving canned bars per symbol.
    #[derive(Default)]
    pub struct FakeSource {
        pub bars: HashMap<String, Vec<DailyBar>>,
        pub requests: Mutex<Vec<String>>,
    }

    impl FakeSource {
        pub fn with(mut self, symbol: &str, bars: Vec<DailyBar>) -> Self {
            self.bars.insert(symbol.to_string(), bars);
            self
        }
    }

    #[async_trait]
    impl MarketDataSource for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        async fn fetch_daily_bars(
            &self,
            symbol: &str,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<DailyBar>, FetchError> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(symbol.to_string());
            }
            let bars = self
                .bars
                .get(symbol)
                .ok_or_else(|| FetchError::SymbolNotFound(symbol.to_string()))?;
            Ok(bars
                .iter()
                .filter(|b| b.date >= start && b.date <= end)
                .cloned()
                .collect())
        }
    }

    pub fn bar(date: &str, px: f64) -> DailyBar {
        DailyBar {
            date: crate::models::test_support::day(date),
            open: Some(px),
            high: Some(px),
            low: Some(px),
            close: Some(px),
            adj_close: Some(px),
            volume: Some(1000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{FakeSource, bar};
    use super::*;
    use crate::loader::load_price_csv;
    use crate::models::test_support::day;

    #[tokio::test]
    async fn test_download_writes_one_csv_per_term() {
        let dir = tempfile::tempdir().unwrap();
        let raw_dir = dir.path().join("raw");
        let source = FakeSource::default()
            .with("SPY", vec![bar("2021-01-04", 370.0), bar("2021-01-05", 371.5)])
            .with("BTC-USD", vec![bar("2021-01-03", 32000.0)]);
        let terms = vec!["SPY".to_string(), "BTC-USD".to_string()];

        let written = download_csv(&source, &raw_dir, &terms, day("2021-01-01"), day("2021-01-31"))
            .await
            .unwrap();

        assert_eq!(written, vec![raw_dir.join("SPY.csv"), raw_dir.join("BTC-USD.csv")]);
        let spy = load_price_csv(&written[0]).unwrap();
        assert_eq!(spy.len(), 2);
        assert_eq!(spy.column("Adj Close").unwrap().values[1], Some(371.5));
    }

    #[test]
    fn test_download_aborts_on_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default().with("SPY", vec![bar("2021-01-04", 370.0)]);
        let terms = vec!["SPY".to_string(), "NOPE".to_string(), "QQQ".to_string()];

        let result = tokio_test::block_on(download_csv(
            &source,
            dir.path(),
            &terms,
            day("2021-01-01"),
            day("2021-01-31"),
        ));

        assert!(matches!(result, Err(FetchError::SymbolNotFound(s)) if s == "NOPE"));
        assert!(dir.path().join("SPY.csv").exists());
        assert_eq!(*source.requests.lock().unwrap(), vec!["SPY", "NOPE"]);
    }

    #[test]
    fn test_missing_values_written_as_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("X.csv");
        let mut b = bar("2021-01-04", 1.0);
        b.adj_close = None;
        b.volume = None;
        write_price_csv(&path, &[b]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "Date,Open,High,Low,Close,Adj Close,Volume\n2021-01-04,1,1,1,1,null,null\n"
        );
    }
}
