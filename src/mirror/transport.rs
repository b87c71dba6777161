use crate::error::MirrorError;
use crate::mirror::config::{SourceConfig, TransportConfig};
use anyhow::{Context, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header::{REFERER, USER_AGENT};
use std::cell::Cell;
use std::thread;
use std::time::{Duration, Instant};

/// Binary download seam used by the asset archiver.
pub trait BinaryFetch {
    fn fetch_bytes(&self, url: &str, referer: &str) -> Result<Vec<u8>>;
}

/// Minimum spacing between calls of one request class.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last: Cell<Option<Instant>>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Cell::new(None),
        }
    }

    /// Sleep for whatever remains of the interval since the previous call.
    pub fn pace(&self) {
        if let Some(last) = self.last.get() {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                thread::sleep(self.interval - elapsed);
            }
        }
        self.last.set(Some(Instant::now()));
    }
}

pub struct HttpFetcher {
    client: Client,
    user_agent: String,
    retries: usize,
    backoff: Duration,
}

impl HttpFetcher {
    pub fn new(source: &SourceConfig, transport: &TransportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(source.timeout_secs))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            user_agent: source.user_agent.clone(),
            retries: transport.retries.max(1),
            backoff: Duration::from_millis(transport.backoff_ms),
        })
    }

    fn send(&self, url: &str, referer: Option<&str>) -> Result<Response> {
        let mut request = self.client.get(url).header(USER_AGENT, &self.user_agent);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }
        let response = request.send()?.error_for_status()?;
        Ok(response)
    }

    fn with_retry<T>(&self, url: &str, mut call: impl FnMut() -> Result<T>) -> Result<T> {
        let mut last_err = None;
        for attempt in 0..self.retries {
            match call() {
                Ok(out) => return Ok(out),
                Err(err) => {
                    tracing::debug!(url, attempt = attempt + 1, "request failed: {err:#}");
                    last_err = Some(err);
                }
            }
            if attempt + 1 < self.retries {
                thread::sleep(self.backoff * (attempt as u32 + 1));
            }
        }

        let message = last_err
            .map(|err| format!("{err:#}"))
            .unwrap_or_else(|| "no attempt made".to_string());
        Err(MirrorError::Transport {
            url: url.to_string(),
            attempts: self.retries,
            message,
        }
        .into())
    }

    /// Fetch a page body, decoded with the charset the response declares.
    pub fn fetch_text(&self, url: &str) -> Result<String> {
        self.with_retry(url, || Ok(self.send(url, None)?.text()?))
    }
}

impl BinaryFetch for HttpFetcher {
    fn fetch_bytes(&self, url: &str, referer: &str) -> Result<Vec<u8>> {
        let referer = (!referer.trim().is_empty()).then_some(referer);
        self.with_retry(url, || Ok(self.send(url, referer)?.bytes()?.to_vec()))
    }
}
