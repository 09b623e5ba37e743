use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Fixed listing parameters: newest first, grid layout.
const LISTING_QUERY: [(&str, &str); 3] = [("view", "0"), ("sort", "dd"), ("flow", "grid")];

/// Where channel pages come from.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct HttpSource {
    http: Client,
    timeout: Duration,
    accept_language: String,
}

impl fmt::Debug for HttpSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSource")
            .field("timeout", &self.timeout)
            .field("accept_language", &self.accept_language)
            .finish_non_exhaustive()
    }
}

impl HttpSource {
    pub fn new(timeout: Duration, accept_language: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("tube-scanner/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            timeout,
            accept_language: accept_language.into(),
        })
    }

    pub fn build_request(&self, url: &str) -> Result<reqwest::Request> {
        self.http
            .get(url)
            .query(&LISTING_QUERY)
            .timeout(self.timeout)
            .header("Accept-Language", &self.accept_language)
            .build()
            .with_context(|| format!("failed to build request for {}", url))
    }
}

#[async_trait]
impl PageSource for HttpSource {
    async fn fetch(&self, url: &str) -> Result<String> {
        let request = self.build_request(url)?;
        debug!(url = %request.url(), "fetching page");
        let res = self
            .http
            .execute(request)
            .await
            .with_context(|| format!("failed to reach {}", url))?;
        let status = res.status();
        if !status.is_success() {
            return Err(anyhow!("{} returned {}", url, status));
        }
        res.text()
            .await
            .with_context(|| format!("failed to read body of {}", url))
    }
}
