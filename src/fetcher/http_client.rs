use crate::config::FetcherConfig;
use crate::fetcher::FetchError;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use url::Url;

pub struct HttpClient {
    inner: reqwest::Client,
    config: FetcherConfig,
}

impl HttpClient {
    pub fn new(config: &FetcherConfig) -> Result<Self, FetchError> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Accept cookies so consent-gated pages work
            .cookie_store(true)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    /// Fetch a URL as text after the polite delay. Single attempt: any
    /// transport error or non-2xx status is returned to the caller.
    pub async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
        self.polite_delay().await;

        debug!("GET {}", url);
        let resp = self.inner.get(url.clone()).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(resp.text().await?)
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let jitter = rand::rng().random_range(0..=self.config.jitter_ms);
        let total = Duration::from_millis(self.config.request_delay_ms + jitter);
        sleep(total).await;
    }
}
