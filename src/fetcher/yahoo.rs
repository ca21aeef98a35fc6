//! Yahoo Finance daily bars via the v8 chart endpoint.
//!
//! The endpoint is unofficial and its shape can change without notice; any
//! deviation surfaces as [`FetchError::ResponseFormat`].

use super::http_client::HttpClient;
use super::{FetchError, MarketDataSource};
use crate::config::FetcherConfig;
use crate::models::DailyBar;
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, NaiveTime};
use serde::Deserialize;
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
struct ChartMeta {
    /// Exchange offset from UTC in seconds; bar timestamps are session opens.
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

pub struct YahooSource {
    client: HttpClient,
    base_url: Url,
}

impl YahooSource {
    pub fn new(config: &FetcherConfig) -> Result<Self, FetchError> {
        Ok(Self {
            client: HttpClient::new(config)?,
            base_url: Url::parse(config.base_url.trim_end_matches('/'))?,
        })
    }

    /// Chart URL covering `start` through `end`, both inclusive.
    fn chart_url(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Url, FetchError> {
        let period1 = start.and_time(NaiveTime::MIN).and_utc().timestamp();
        let period2 = end
            .checked_add_days(Days::new(1))
            .unwrap_or(end)
            .and_time(NaiveTime::MIN)
            .and_utc()
            .timestamp();

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::ResponseFormat(format!("cannot-be-a-base URL {}", self.base_url)))?
            .push(symbol);
        url.query_pairs_mut()
            .append_pair("period1", &period1.to_string())
            .append_pair("period2", &period2.to_string())
            .append_pair("interval", "1d")
            .append_pair("events", "history")
            .append_pair("includeAdjustedClose", "true");
        Ok(url)
    }
}

#[async_trait]
impl MarketDataSource for YahooSource {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    async fn fetch_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>, FetchError> {
        let url = self.chart_url(symbol, start, end)?;

        let body = match self.client.get_text(&url).await {
            Err(FetchError::Http { status: 404, .. }) => {
                return Err(FetchError::SymbolNotFound(symbol.to_string()));
            }
            other => other?,
        };

        let bars = parse_chart_response(symbol, &body)?;
        debug!("{}: {} bars from {}", symbol, bars.len(), self.name());
        Ok(bars)
    }
}

/// Parse a chart response body into daily bars, ascending by date.
///
/// Sessions with no OHLCV at all (holidays) are dropped. When the feed
/// repeats a date (live bar appended to history), the later row wins.
pub(crate) fn parse_chart_response(symbol: &str, body: &str) -> Result<Vec<DailyBar>, FetchError> {
    let resp: ChartResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::ResponseFormat(format!("{symbol}: {e}")))?;

    let data = match (resp.chart.result, resp.chart.error) {
        (Some(result), _) => result
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::ResponseFormat("result array is empty".into()))?,
        (None, Some(err)) if err.code == "Not Found" => {
            return Err(FetchError::SymbolNotFound(symbol.to_string()));
        }
        (None, Some(err)) => {
            return Err(FetchError::ResponseFormat(format!(
                "{}: {}",
                err.code, err.description
            )));
        }
        (None, None) => {
            return Err(FetchError::ResponseFormat("empty result with no error".into()));
        }
    };

    let timestamps = data.timestamp.unwrap_or_default();
    let quote = data.indicators.quote.into_iter().next().unwrap_or_default();
    let adj_closes = data
        .indicators
        .adjclose
        .and_then(|v| v.into_iter().next())
        .map(|a| a.adjclose)
        .unwrap_or_default();

    let mut bars: Vec<DailyBar> = Vec::with_capacity(timestamps.len());

    for (i, &ts) in timestamps.iter().enumerate() {
        let date = DateTime::from_timestamp(ts + data.meta.gmtoffset, 0)
            .map(|dt| dt.date_naive())
            .ok_or_else(|| FetchError::ResponseFormat(format!("invalid timestamp: {ts}")))?;

        let at = |v: &Vec<Option<f64>>| v.get(i).copied().flatten();
        let bar = DailyBar {
            date,
            open: at(&quote.open),
            high: at(&quote.high),
            low: at(&quote.low),
            close: at(&quote.close),
            adj_close: at(&adj_closes),
            volume: quote.volume.get(i).copied().flatten(),
        };

        if bar.open.is_none()
            && bar.high.is_none()
            && bar.low.is_none()
            && bar.close.is_none()
            && bar.volume.is_none()
        {
            continue;
        }

        match bars.last_mut() {
            Some(last) if last.date == date => *last = bar,
            _ => bars.push(bar),
        }
    }

    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);

    if bars.is_empty() {
        return Err(FetchError::SymbolNotFound(symbol.to_string()));
    }
    Ok(bars)
}
