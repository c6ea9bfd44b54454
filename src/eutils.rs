use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::config::RemoteConfig;
use crate::domain::{Batch, FetchResult};
use crate::error::HarvestError;
use crate::parser::{PubmedXmlParser, RecordParser};

/// One remote request per batch; never splits a batch.
pub trait RemoteFetcher {
    fn fetch(&self, batch: &Batch) -> Result<FetchResult, HarvestError>;
}

/// NCBI E-utilities `efetch` client.
pub struct EutilsHttpClient<P: RecordParser = PubmedXmlParser> {
    client: Client,
    config: RemoteConfig,
    parser: P,
}

impl EutilsHttpClient<PubmedXmlParser> {
    pub fn new(config: RemoteConfig) -> Result<Self, HarvestError> {
        Self::with_parser(config, PubmedXmlParser)
    }
}

impl<P: RecordParser> EutilsHttpClient<P> {
    pub fn with_parser(mut config: RemoteConfig, parser: P) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("pubmed-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::RemoteHttp(err.to_string()))?,
        );

        if config.api_key.is_none() {
            if let Ok(api_key) = std::env::var("NCBI_API_KEY") {
                if !api_key.trim().is_empty() {
                    config.api_key = Some(api_key.trim().to_string());
                }
            }
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| HarvestError::RemoteHttp(err.to_string()))?;

        Ok(Self {
            client,
            config,
            parser,
        })
    }

    fn query(&self, batch: &Batch) -> Vec<(&'static str, String)> {
        build_query(&self.config, batch)
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, HarvestError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        let max_retries = self.config.max_retries;
        let base_delay_ms = self.config.retry_base_delay_ms;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < max_retries && is_retryable_status(status) {
                        let delay = base_delay_ms * (attempt as u64 + 1);
                        tracing::warn!(status, attempt, delay_ms = delay, "retrying efetch");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < max_retries && is_retryable_error(&err) {
                        let delay = base_delay_ms * (attempt as u64 + 1);
                        tracing::warn!(error = %err, attempt, delay_ms = delay, "retrying efetch");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(HarvestError::RemoteHttp(err.to_string()));
                }
            }
        }
    }
}

impl<P: RecordParser> RemoteFetcher for EutilsHttpClient<P> {
    fn fetch(&self, batch: &Batch) -> Result<FetchResult, HarvestError> {
        let started = Instant::now();
        let query = self.query(batch);
        let response =
            self.send_with_retries(|| self.client.get(&self.config.base_url).query(&query))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "efetch request failed".to_string());
            return Err(HarvestError::RemoteStatus { status, message });
        }
        let raw = response
            .bytes()
            .map_err(|err| HarvestError::RemoteHttp(err.to_string()))?
            .to_vec();
        let records = self.parser.parse(&raw)?;

        tracing::info!(
            identifiers = batch.len(),
            records = records.len(),
            bytes = raw.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "efetch complete"
        );
        Ok(FetchResult { records, raw })
    }
}

pub fn build_query(config: &RemoteConfig, batch: &Batch) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("db", config.database.clone()),
        ("retmode", "xml".to_string()),
        ("id", batch.joined(",")),
    ];
    if let Some(api_key) = &config.api_key {
        query.push(("api_key", api_key.clone()));
    }
    if let Some(tool) = &config.tool {
        query.push(("tool", tool.clone()));
    }
    if let Some(email) = &config.email {
        query.push(("email", email.clone()));
    }
    query
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
