use crate::config::{AirtableConfig, AirtableCredentials, FieldMapping};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use http::StatusCode;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum RecordStoreError {
    #[error("Airtable request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Airtable request failed: {0}")]
    Request(reqwest::Error),

    #[error("Invalid Airtable URL: {0}")]
    InvalidUrl(String),
}

/// A lead as written to the record store.
#[derive(Clone, Debug, PartialEq)]
pub struct LeadRecord {
    pub full_name: String,
    pub email: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CreateOutcome {
    /// The store accepted the record. `id` is missing when the success body
    /// could not be read or did not carry one.
    Created { id: Option<String> },
    /// Non-2xx answer from the store, with the raw response body.
    Rejected { status: StatusCode, body: String },
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, record: &LeadRecord) -> Result<CreateOutcome, RecordStoreError>;
}

#[derive(Serialize)]
struct CreateRecordRequest<'a> {
    fields: IndexMap<&'a str, &'a str>,
}

#[derive(Deserialize)]
struct CreatedRecord {
    id: Option<String>,
}

pub struct AirtableClient {
    client: reqwest::Client,
    table_url: Url,
    api_token: String,
    source: String,
    fields: FieldMapping,
    timeout: Duration,
}

impl AirtableClient {
    pub fn new(
        config: &AirtableConfig,
        credentials: &AirtableCredentials<'_>,
    ) -> Result<Self, RecordStoreError> {
        let mut table_url = config.api_url.clone();
        table_url
            .path_segments_mut()
            .map_err(|_| RecordStoreError::InvalidUrl(config.api_url.to_string()))?
            .pop_if_empty()
            .extend([credentials.base_id, credentials.table_id]);

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RecordStoreError::Request)?;

        Ok(AirtableClient {
            client,
            table_url,
            api_token: credentials.api_token.to_string(),
            source: config.source.clone(),
            fields: config.fields.clone(),
            timeout,
        })
    }

    pub fn table_url(&self) -> &Url {
        &self.table_url
    }

    fn request_body<'a>(
        &'a self,
        record: &'a LeadRecord,
        submitted_at: &'a str,
    ) -> CreateRecordRequest<'a> {
        let mut fields = IndexMap::with_capacity(4);
        fields.insert(self.fields.full_name.as_str(), record.full_name.as_str());
        fields.insert(self.fields.email.as_str(), record.email.as_str());
        fields.insert(self.fields.source.as_str(), self.source.as_str());
        fields.insert(self.fields.submitted_at.as_str(), submitted_at);
        CreateRecordRequest { fields }
    }

    fn map_request_error(&self, e: reqwest::Error) -> RecordStoreError {
        if e.is_timeout() {
            RecordStoreError::Timeout(self.timeout)
        } else {
            RecordStoreError::Request(e)
        }
    }
}

#[async_trait]
impl RecordStore for AirtableClient {
    async fn create(&self, record: &LeadRecord) -> Result<CreateOutcome, RecordStoreError> {
        let submitted_at = record
            .submitted_at
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        let response = self
            .client
            .post(self.table_url.clone())
            .bearer_auth(&self.api_token)
            .json(&self.request_body(record, &submitted_at))
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| self.map_request_error(e))?;
            return Ok(CreateOutcome::Rejected { status, body });
        }

        // The record exists once the store answered 2xx, whatever the body says.
        let id = match response.text().await {
            Ok(body) => match serde_json::from_str::<CreatedRecord>(&body) {
                Ok(CreatedRecord { id: None }) => {
                    tracing::warn!("Airtable accepted record without an id");
                    None
                }
                Ok(created) => created.id,
                Err(e) => {
                    tracing::warn!(error = %e, "Could not decode Airtable success body");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Could not read Airtable success body");
                None
            }
        };
        Ok(CreateOutcome::Created { id })
    }
}

/// Pulls the human readable message out of an Airtable error body. Errors come
/// either as `{"error": "NOT_FOUND"}` or as
/// `{"error": {"type": "...", "message": "..."}}`; anything else is returned raw.
pub fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };

    match value.get("error") {
        Some(Value::String(message)) => message.clone(),
        Some(error @ Value::Object(_)) => error
            .get("message")
            .or_else(|| error.get("type"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        _ => body.to_string(),
    }
}

/// Whether an Airtable rejection says the record already exists. Both the
/// message and the error type are searched.
pub fn is_duplicate_rejection(status: StatusCode, body: &str) -> bool {
    if status != StatusCode::UNPROCESSABLE_ENTITY {
        return false;
    }

    let mentions_duplicate = |text: &str| text.to_lowercase().contains("duplicate");
    if mentions_duplicate(&error_message(body)) {
        return true;
    }

    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|error| error.get("type"))
                .and_then(Value::as_str)
                .map(mentions_duplicate)
        })
        .unwrap_or(false)
}
