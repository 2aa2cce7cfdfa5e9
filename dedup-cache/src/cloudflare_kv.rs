// Durable tier backed by a Workers KV namespace, accessed through the
// Cloudflare REST API. Values are the RFC 3339 record time; expiry is
// delegated to KV via `expiration_ttl`.
use crate::durable::{DurableStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use http::StatusCode;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.cloudflare.com/client/v4";

// KV rejects expiration_ttl values below 60 seconds.
const MIN_TTL_SECS: i64 = 60;
const MAX_ERROR_BODY: usize = 200;

pub struct CloudflareKvStore {
    client: reqwest::Client,
    values_url: Url,
    api_token: String,
}

impl CloudflareKvStore {
    pub fn new(
        api_url: &Url,
        account_id: &str,
        namespace_id: &str,
        api_token: String,
    ) -> Result<Self, StoreError> {
        let mut values_url = api_url.clone();
        values_url
            .path_segments_mut()
            .map_err(|_| StoreError::InvalidUrl(api_url.to_string()))?
            .pop_if_empty()
            .extend([
                "accounts",
                account_id,
                "storage",
                "kv",
                "namespaces",
                namespace_id,
                "values",
            ]);

        Ok(CloudflareKvStore {
            client: reqwest::Client::new(),
            values_url,
            api_token,
        })
    }

    fn value_url(&self, key: &str) -> Result<Url, StoreError> {
        let mut url = self.values_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidUrl(self.values_url.to_string()))?
            .push(key);
        Ok(url)
    }

    async fn unexpected_status(response: reqwest::Response) -> StoreError {
        let status = response.status();
        let mut body = response.text().await.unwrap_or_default();
        if let Some((idx, _)) = body.char_indices().nth(MAX_ERROR_BODY) {
            body.truncate(idx);
        }
        StoreError::UnexpectedStatus { status, body }
    }
}

#[async_trait]
impl DurableStore for CloudflareKvStore {
    async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let response = self
            .client
            .get(self.value_url(key)?)
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let value = response.text().await?;
                DateTime::parse_from_rfc3339(value.trim())
                    .map(|recorded_at| Some(recorded_at.with_timezone(&Utc)))
                    .map_err(|e| StoreError::InvalidValue(format!("{value:?}: {e}")))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::unexpected_status(response).await),
        }
    }

    async fn put(
        &self,
        key: &str,
        recorded_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut url = self.value_url(key)?;
        url.query_pairs_mut().append_pair(
            "expiration_ttl",
            &ttl.num_seconds().max(MIN_TTL_SECS).to_string(),
        );

        let response = self
            .client
            .put(url)
            .bearer_auth(&self.api_token)
            .body(recorded_at.to_rfc3339())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::unexpected_status(response).await);
        }

        Ok(())
    }
}
