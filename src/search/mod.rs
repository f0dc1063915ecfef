//! Client for the external web search provider.
//!
//! [`SearchService::search`] reports provider failures as typed errors;
//! [`run_query`] is the request boundary that logs them and falls back to an
//! empty result list. Only a missing or empty credential file escapes it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use thiserror::Error;
use tokio::fs;
use tracing::{info, instrument, warn};

use crate::config;
use crate::model::SearchResult;
use crate::search::model::SearchEnvelope;

pub mod model;

pub const DEFAULT_ENDPOINT: &str = "https://api.datamarket.azure.com/Bing/Search/Web";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("search key file {path} could not be read: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("search key file {0} is empty")]
    Empty(String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid search endpoint: {0}")]
    Endpoint(String),
    #[error("search request timed out")]
    Timeout,
    #[error("search request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("search provider returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid search response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Transport(err)
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search(&self, terms: &str) -> Result<Vec<SearchResult>, SearchError>;
}

#[derive(Clone)]
pub struct BingClient {
    http: Client,
    endpoint: String,
    key_file: PathBuf,
    results_per_page: u32,
    offset: u32,
}

impl fmt::Debug for BingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BingClient")
            .field("endpoint", &self.endpoint)
            .field("key_file", &self.key_file)
            .finish_non_exhaustive()
    }
}

impl BingClient {
    pub fn new(
        endpoint: impl Into<String>,
        key_file: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .user_agent(concat!("rango/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            key_file: key_file.into(),
            results_per_page: 10,
            offset: 0,
        })
    }

    pub fn from_config(cfg: &config::Search) -> Result<Self, ProviderError> {
        let mut client = Self::new(
            cfg.endpoint.clone(),
            cfg.key_file.clone(),
            Duration::from_secs(cfg.timeout_secs),
        )?;
        client.results_per_page = cfg.results_per_page;
        Ok(client)
    }

    /// Full request URL for `terms`, quoted and percent-encoded.
    pub fn query_url(&self, terms: &str) -> Result<Url, ProviderError> {
        build_query_url(&self.endpoint, terms, self.results_per_page, self.offset)
    }

    async fn fetch(&self, api_key: &str, terms: &str) -> Result<Vec<SearchResult>, ProviderError> {
        let url = self.query_url(terms)?;
        info!(endpoint = %self.endpoint, terms_len = terms.len(), "querying search provider");

        let res = self
            .http
            .get(url)
            .basic_auth("", Some(api_key))
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "search provider error");
            return Err(ProviderError::Status { status, body });
        }

        let body = res.text().await?;
        let results = parse_response(&body)?;
        info!(count = results.len(), "search provider answered");
        Ok(results)
    }
}

#[async_trait]
impl SearchService for BingClient {
    #[instrument(skip_all)]
    async fn search(&self, terms: &str) -> Result<Vec<SearchResult>, SearchError> {
        let api_key = read_api_key(&self.key_file).await?;
        Ok(self.fetch(&api_key, terms).await?)
    }
}

/// Read the provider key: the first line of `path`, whitespace trimmed.
pub async fn read_api_key(path: &Path) -> Result<String, CredentialError> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|source| CredentialError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
    let key = content.lines().next().unwrap_or_default().trim();
    if key.is_empty() {
        return Err(CredentialError::Empty(path.display().to_string()));
    }
    Ok(key.to_string())
}

pub fn build_query_url(
    endpoint: &str,
    terms: &str,
    results_per_page: u32,
    offset: u32,
) -> Result<Url, ProviderError> {
    let quoted = quote(&format!("'{}'", terms));
    let sep = if endpoint.contains('?') { '&' } else { '?' };
    let raw = format!(
        "{}{}$format=json&$top={}&$skip={}&Query={}",
        endpoint, sep, results_per_page, offset, quoted
    );
    Url::parse(&raw).map_err(|e| ProviderError::Endpoint(format!("{}: {}", endpoint, e)))
}

/// Percent-encode everything except unreserved characters and `/`.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char);
            }
            _ => {
                out.push('%');
                out.push(char::from(b"0123456789ABCDEF"[(b >> 4) as usize]));
                out.push(char::from(b"0123456789ABCDEF"[(b & 0xf) as usize]));
            }
        }
    }
    out
}

pub fn parse_response(body: &str) -> Result<Vec<SearchResult>, ProviderError> {
    let envelope: SearchEnvelope = serde_json::from_str(body)?;
    Ok(envelope.d.results.into_iter().map(SearchResult::from).collect())
}

/// Run a search at the request boundary. Blank terms short-circuit to no
/// results; provider failures are logged and surface as an empty list.
#[instrument(skip_all)]
pub async fn run_query(
    service: &dyn SearchService,
    terms: &str,
) -> Result<Vec<SearchResult>, CredentialError> {
    let terms = terms.trim();
    if terms.is_empty() {
        return Ok(Vec::new());
    }
    match service.search(terms).await {
        Ok(results) => Ok(results),
        Err(SearchError::Credential(err)) => Err(err),
        Err(SearchError::Provider(err)) => {
            warn!(error = %err, "error when querying the search provider");
            Ok(Vec::new())
        }
    }
}
