use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use reqwest::Client;
use url::Url;

use gleaner_core::error::AppError;
use gleaner_core::traits::{CachePolicy, Fetcher};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CACHE_CAPACITY: u64 = 256;
const CACHE_TTL: Duration = Duration::from_secs(600);

/// HTTP byte fetcher using reqwest.
///
/// A bounded in-memory cache backs the caller's [`CachePolicy`]:
/// `NoCache` always goes to the network, `IfFresh` serves unexpired
/// entries and refills on miss, `CacheOnly` never touches the network.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    cache: Cache<String, Arc<Vec<u8>>>,
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent("Gleaner/0.3 (Content Acquisition)")
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Fetch(e.to_string()))?;
        let cache = Cache::builder()
            .max_capacity(CACHE_CAPACITY)
            .time_to_live(CACHE_TTL)
            .build();
        Ok(Self {
            client,
            cache,
            timeout_secs: timeout.as_secs(),
        })
    }

    async fn fetch_remote(&self, url: &Url) -> Result<Vec<u8>, AppError> {
        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(AppError::Fetch(format!(
                    "scheme '{scheme}' is not fetchable over HTTP"
                )));
            }
        }

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Fetch(format!("timed out after {}s: {url}", self.timeout_secs))
            } else if e.is_connect() {
                AppError::Fetch(format!("connection failed: {e}"))
            } else {
                AppError::Fetch(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Fetch(format!(
                "HTTP {} for {url}",
                status.as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::Fetch(format!("failed to read response body: {e}")))?;
        tracing::debug!(url = %url, bytes = bytes.len(), "fetched");
        Ok(bytes.to_vec())
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, policy: CachePolicy) -> Result<Vec<u8>, AppError> {
        let key = url.to_string();
        match policy {
            CachePolicy::NoCache => self.fetch_remote(url).await,
            CachePolicy::CacheOnly => match self.cache.get(&key).await {
                Some(hit) => Ok(hit.to_vec()),
                None => Err(AppError::Fetch(format!("'{url}' is not cached"))),
            },
            CachePolicy::IfFresh => {
                if let Some(hit) = self.cache.get(&key).await {
                    return Ok(hit.to_vec());
                }
                let bytes = self.fetch_remote(url).await?;
                self.cache.insert(key, Arc::new(bytes.clone())).await;
                Ok(bytes)
            }
        }
    }

    async fn fetch_to_file(
        &self,
        url: &Url,
        policy: CachePolicy,
        dest: &Path,
    ) -> Result<(), AppError> {
        let bytes = self.fetch(url, policy).await?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_only_fails_on_cold_cache() {
        let fetcher = HttpFetcher::new().unwrap();
        let url = Url::parse("http://example.org/resource").unwrap();
        let err = fetcher.fetch(&url, CachePolicy::CacheOnly).await.unwrap_err();
        assert!(err.to_string().contains("not cached"));
    }

    #[tokio::test]
    async fn non_http_scheme_is_rejected() {
        let fetcher = HttpFetcher::new().unwrap();
        let url = Url::parse("file:///etc/passwd").unwrap();
        let err = fetcher.fetch(&url, CachePolicy::NoCache).await.unwrap_err();
        assert!(err.to_string().contains("not fetchable"));
    }

    #[tokio::test]
    async fn if_fresh_serves_previous_insert() {
        let fetcher = HttpFetcher::new().unwrap();
        let url = Url::parse("http://example.org/cached").unwrap();
        fetcher
            .cache
            .insert(url.to_string(), Arc::new(b"cached bytes".to_vec()))
            .await;
        let bytes = fetcher.fetch(&url, CachePolicy::IfFresh).await.unwrap();
        assert_eq!(bytes, b"cached bytes");
    }

    #[tokio::test]
    async fn fetch_to_file_delivers_cached_bytes() {
        let fetcher = HttpFetcher::new().unwrap();
        let url = Url::parse("http://example.org/payload").unwrap();
        fetcher
            .cache
            .insert(url.to_string(), Arc::new(b"file payload".to_vec()))
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("payload.bin");
        fetcher
            .fetch_to_file(&url, CachePolicy::CacheOnly, &dest)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"file payload");
    }
}
