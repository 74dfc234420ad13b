use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::{Client, Response};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::RemoteConfig;
use crate::ledger::FileKind;

/// Files the server currently holds for one day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DayListing {
    #[serde(default)]
    pub data: Vec<String>,
    #[serde(default)]
    pub photos: Vec<String>,
}

impl DayListing {
    pub fn files(&self, kind: FileKind) -> &[String] {
        match kind {
            FileKind::Data => &self.data,
            FileKind::Photo => &self.photos,
        }
    }
}

pub trait RecordsApi {
    fn list_dates(&mut self) -> Result<Vec<String>>;
    fn list_day(&mut self, day: &str) -> Result<DayListing>;
    fn download(&mut self, day: &str, kind: FileKind, name: &str) -> Result<Vec<u8>>;
    fn purge_day(&mut self, day: &str) -> Result<()>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct RecordsClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl RecordsClientConfig {
    pub fn from_config(remote: &RemoteConfig) -> Result<Self> {
        let Some(base_url) = remote.base_url() else {
            bail!("remote base URL is not configured (set [remote].base_url or CAGEREPORT_BASE_URL)");
        };
        Ok(Self {
            base_url,
            user_agent: remote.user_agent(),
            timeout_ms: remote.timeout_ms(),
            max_retries: remote.max_retries(),
            retry_delay_ms: remote.retry_delay_ms(),
        })
    }
}

pub struct HttpRecordsClient {
    client: Client,
    base: Url,
    config: RecordsClientConfig,
    request_count: usize,
}

impl HttpRecordsClient {
    pub fn new(config: RecordsClientConfig) -> Result<Self> {
        let mut base_text = config.base_url.clone();
        if !base_text.ends_with('/') {
            base_text.push('/');
        }
        let base = Url::parse(&base_text)
            .with_context(|| format!("invalid records base URL: {}", config.base_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build records HTTP client")?;
        Ok(Self {
            client,
            base,
            config,
            request_count: 0,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("invalid endpoint path {path}"))
    }

    /// The file name becomes one percent-encoded path segment, so `?`, `#`
    /// and `%` stay part of the name.
    fn file_url(&self, day: &str, kind: FileKind, name: &str) -> Result<Url> {
        let mut url = self.endpoint(&format!("{day}/{}/", kind.as_str()))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("records base URL cannot hold path segments"))?
            .pop_if_empty()
            .push(name);
        Ok(url)
    }

    fn send(&mut self, url: Url, post: bool) -> Result<Response> {
        let attempts = self.config.max_retries.max(1);
        for attempt in 1..=attempts {
            self.request_count += 1;
            let request = if post {
                self.client.post(url.clone())
            } else {
                self.client.get(url.clone())
            };
            let response = request
                .header("User-Agent", self.config.user_agent.clone())
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if attempt < attempts && is_retryable_status(status) {
                        warn!(url = %url, %status, attempt, "retrying request");
                        self.wait_before_retry();
                        continue;
                    }
                    bail!("request to {url} failed with HTTP {status}");
                }
                Err(error) => {
                    if attempt < attempts && is_retryable_error(&error) {
                        warn!(url = %url, error = %error, attempt, "network error; retrying");
                        self.wait_before_retry();
                        continue;
                    }
                    return Err(error).with_context(|| format!("failed to call {url}"));
                }
            }
        }
        bail!("request to {url} exhausted retry budget")
    }

    fn wait_before_retry(&self) {
        sleep(Duration::from_millis(self.config.retry_delay_ms));
    }
}

impl RecordsApi for HttpRecordsClient {
    fn list_dates(&mut self) -> Result<Vec<String>> {
        let url = self.endpoint("list_dates")?;
        self.send(url, false)?
            .json::<Vec<String>>()
            .context("failed to decode list_dates response")
    }

    fn list_day(&mut self, day: &str) -> Result<DayListing> {
        let url = self.endpoint(&format!("{day}/list"))?;
        self.send(url, false)?
            .json::<DayListing>()
            .with_context(|| format!("failed to decode file list for {day}"))
    }

    fn download(&mut self, day: &str, kind: FileKind, name: &str) -> Result<Vec<u8>> {
        let url = self.file_url(day, kind, name)?;
        let bytes = self
            .send(url, false)?
            .bytes()
            .with_context(|| format!("failed to read {day}/{}/{name}", kind.as_str()))?;
        debug!(day, kind = kind.as_str(), file = name, bytes = bytes.len(), "downloaded");
        Ok(bytes.to_vec())
    }

    fn purge_day(&mut self, day: &str) -> Result<()> {
        let url = self.endpoint(&format!("{day}/delete"))?;
        self.send(url, true)?;
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}
