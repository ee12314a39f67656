use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tracing::debug;

use crate::config::FetchConfig;
use crate::error::{Error, Result};

/// Location of a module payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    /// Remote payload fetched over http(s)
    Url(Url),
    /// Payload on the local filesystem
    Path(PathBuf),
}

impl ModuleSource {
    /// Parse a configured source string.
    ///
    /// `http://` and `https://` become [`ModuleSource::Url`]; `file://` URLs
    /// and anything else become [`ModuleSource::Path`].
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::configuration("module source is empty"));
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            let url = Url::parse(raw)
                .map_err(|e| Error::configuration(format!("invalid module URL '{}': {}", raw, e)))?;
            return Ok(Self::Url(url));
        }

        if raw.starts_with("file://") {
            let url = Url::parse(raw)
                .map_err(|e| Error::configuration(format!("invalid module URL '{}': {}", raw, e)))?;
            let path = url
                .to_file_path()
                .map_err(|()| Error::configuration(format!("not a local file URL: {}", raw)))?;
            return Ok(Self::Path(path));
        }

        Ok(Self::Path(PathBuf::from(raw)))
    }

    /// Whether retrieval goes over the network
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Url(_))
    }
}

impl FromStr for ModuleSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ModuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{}", url),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Retrieves the raw module payload.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayloadFetcher: Send + Sync {
    /// Fetch the whole payload. One attempt, no retry.
    async fn fetch(&self, source: &ModuleSource) -> Result<Vec<u8>>;
}

/// Default fetcher: `reqwest` for URLs, `tokio::fs` for paths.
#[derive(Debug, Clone)]
pub struct SourceFetcher {
    client: reqwest::Client,
}

impl SourceFetcher {
    /// Create a fetcher whose HTTP requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::configuration(format!("HTTP client error: {}", e)))?;
        Ok(Self { client })
    }

    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        Self::new(config.timeout())
    }

    async fn fetch_url(&self, url: &Url) -> Result<Vec<u8>> {
        let location = url.to_string();
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::fetch(&location, e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::fetch(&location, e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::fetch(&location, e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl PayloadFetcher for SourceFetcher {
    async fn fetch(&self, source: &ModuleSource) -> Result<Vec<u8>> {
        let payload = match source {
            ModuleSource::Url(url) => self.fetch_url(url).await?,
            ModuleSource::Path(path) => tokio::fs::read(path)
                .await
                .map_err(|e| Error::fetch(path.display().to_string(), e.to_string()))?,
        };

        if payload.is_empty() {
            return Err(Error::fetch(source.to_string(), "empty payload"));
        }

        debug!(source = %source, bytes = payload.len(), "Module payload fetched");
        Ok(payload)
    }
}
