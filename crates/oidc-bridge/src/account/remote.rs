//! Remote account store backed by an HTTP document service.
//!
//! Provides:
//! - Connection pooling via reqwest
//! - Retry middleware with exponential backoff for transient failures
//! - Short-TTL caching of successful lookups
//!
//! Endpoints expected from the service:
//! - `GET {base}/accounts/{id}`: the record, or 404 when absent
//! - `GET {base}/accounts?loginId={login}`: JSON array of matching records

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::{Client, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};

use super::{AccountRecord, AccountStore};
use crate::config::RemoteStoreConfig;
use crate::error::{StoreError, StoreResult};

/// Account store that queries a networked document service.
#[derive(Clone)]
pub struct RemoteAccountStore {
    /// HTTP client with middleware.
    client: ClientWithMiddleware,

    /// Cache of successful lookups keyed by `id:` / `login:` prefix.
    cache: Cache<String, Option<AccountRecord>>,

    /// Service base URL (no trailing slash).
    base_url: String,
}

impl RemoteAccountStore {
    /// Create a store client from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is missing or the HTTP client cannot be built.
    pub fn new(config: &RemoteStoreConfig) -> anyhow::Result<Self> {
        let Some(ref base_url) = config.base_url else {
            anyhow::bail!("remote account store requires a base URL");
        };

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        if let Some(ref key) = config.api_key {
            let mut value: reqwest::header::HeaderValue = key.parse()?;
            value.set_sensitive(true);
            headers.insert("x-api-key", value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(100), Duration::from_secs(2))
            .build_with_max_retries(config.max_retries);

        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        let cache = Cache::builder()
            .max_capacity(config.cache_max_size)
            .time_to_live(config.cache_ttl)
            .build();

        Ok(Self { client, cache, base_url: base_url.trim_end_matches('/').to_string() })
    }

    /// Fetch and decode, mapping 404 to `None`.
    async fn get<T>(&self, url: &str, params: &[(&str, &str)]) -> StoreResult<Option<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self.client.get(url).query(params).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Status { status: status.as_u16(), message });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| StoreError::malformed(format!("{url}: {e}")))
    }

    async fn cached<F>(&self, key: String, fetch: F) -> StoreResult<Option<AccountRecord>>
    where
        F: std::future::Future<Output = StoreResult<Option<AccountRecord>>>,
    {
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(hit);
        }
        let value = fetch.await?;
        self.cache.insert(key, value.clone()).await;
        Ok(value)
    }
}

#[async_trait]
impl AccountStore for RemoteAccountStore {
    async fn find_by_login_id(&self, login_id: &str) -> StoreResult<Option<AccountRecord>> {
        let key = format!("login:{login_id}");
        self.cached(key, async {
            let url = format!("{}/accounts", self.base_url);
            let records: Vec<AccountRecord> =
                self.get(&url, &[("loginId", login_id)]).await?.unwrap_or_default();

            // The service may match loosely; only exact, case-sensitive hits count.
            let mut exact = records.into_iter().filter(|r| r.login_id == login_id);
            let first = exact.next();
            if exact.next().is_some() {
                return Err(StoreError::malformed(format!(
                    "multiple accounts share login id '{login_id}'"
                )));
            }
            Ok(first)
        })
        .await
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<AccountRecord>> {
        let key = format!("id:{id}");
        self.cached(key, async {
            let url = format!("{}/accounts/{}", self.base_url, urlencode_segment(id));
            let record: Option<AccountRecord> = self.get(&url, &[]).await?;
            match record {
                Some(record) if record.id != id => Err(StoreError::malformed(format!(
                    "requested account '{id}' but service returned '{}'",
                    record.id
                ))),
                other => Ok(other),
            }
        })
        .await
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

impl std::fmt::Debug for RemoteAccountStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAccountStore").field("base_url", &self.base_url).finish()
    }
}

/// Percent-encode a single path segment.
fn urlencode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect::<String>().replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_base_url() {
        assert!(RemoteAccountStore::new(&RemoteStoreConfig::default()).is_err());
    }

    #[test]
    fn test_segment_encoding() {
        assert_eq!(urlencode_segment("a b/c"), "a%20b%2Fc");
        assert_eq!(urlencode_segment("23121d3c-84df"), "23121d3c-84df");
    }
}
