use crate::errors::GatewayError;
use crate::metrics_defs::{REQUEST_DURATION, SUBMISSION_REQUESTS, UPSTREAM_REQUEST_DURATION};
use crate::record_store::{
    CreateOutcome, LeadRecord, RecordStore, error_message, is_duplicate_rejection,
};
use chrono::Utc;
use dedup_cache::identity::normalize;
use dedup_cache::{CacheLookup, DedupCache, Tier};
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT,
};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Limited};
use hyper::body::{Body, Bytes};
use serde_json::{Value, json};
use shared::http::{PeerAddr, json_response};
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

const MAX_DETAILS_CHARS: usize = 500;
const MAX_LOGGED_NAME_CHARS: usize = 20;

const SKIPPED_MESSAGE: &str = "Submission already received";

/// Successful ends of the request state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Accepted {
    Preflight,
    /// The dedup cache already holds the identity; the record store was not called.
    Skipped { tier: Tier },
    /// Written to the record store. The id is absent when the store did not report one.
    Created { id: Option<String> },
    /// The record store rejected the record as a duplicate.
    UpstreamDuplicate { message: String },
}

impl Accepted {
    pub fn outcome(&self) -> &'static str {
        match self {
            Accepted::Preflight => "preflight",
            Accepted::Skipped { .. } => "duplicate_skipped",
            Accepted::Created { .. } => "accepted",
            Accepted::UpstreamDuplicate { .. } => "upstream_duplicate",
        }
    }

    fn to_response(&self) -> Response<Bytes> {
        match self {
            Accepted::Preflight => {
                let mut response = Response::new(Bytes::new());
                *response.status_mut() = StatusCode::NO_CONTENT;
                response
            }
            Accepted::Skipped { .. } => json_response(
                StatusCode::OK,
                &json!({
                    "success": true,
                    "id": "duplicate",
                    "message": SKIPPED_MESSAGE,
                    "skipped": true,
                }),
            ),
            Accepted::Created { id: Some(id) } => {
                json_response(StatusCode::OK, &json!({ "success": true, "id": id }))
            }
            Accepted::Created { id: None } => {
                json_response(StatusCode::OK, &json!({ "success": true }))
            }
            Accepted::UpstreamDuplicate { message } => json_response(
                StatusCode::OK,
                &json!({
                    "success": true,
                    "id": "duplicate",
                    "message": message,
                    "skipped": true,
                }),
            ),
        }
    }
}

struct Submission {
    full_name: String,
    email: String,
}

impl Submission {
    fn parse(body: &[u8]) -> Result<Self, GatewayError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| GatewayError::Internal(format!("Invalid JSON body: {e}")))?;

        match (
            required_field(&value, "fullName"),
            required_field(&value, "email"),
        ) {
            (Some(full_name), Some(email)) => Ok(Submission {
                full_name: full_name.to_string(),
                email: email.to_string(),
            }),
            _ => Err(GatewayError::MissingFields),
        }
    }
}

fn required_field<'a>(value: &'a Value, name: &str) -> Option<&'a str> {
    value
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Caller details carried by the per-request log event.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub ip: String,
    pub origin: String,
    pub user_agent: String,
    pub full_name: Option<String>,
}

impl RequestContext {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let headers = req.headers();
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let ip = header("cf-connecting-ip")
            .map(str::to_string)
            .or_else(|| {
                header("x-forwarded-for")
                    .and_then(|v| v.split(',').next())
                    .map(|v| v.trim().to_string())
            })
            .or_else(|| {
                req.extensions()
                    .get::<PeerAddr>()
                    .map(|peer| peer.0.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".into());

        let origin = header(ORIGIN.as_str())
            .or_else(|| header(REFERER.as_str()))
            .unwrap_or("unknown")
            .to_string();

        let user_agent = header(USER_AGENT.as_str())
            .unwrap_or("unknown")
            .to_string();

        RequestContext {
            ip,
            origin,
            user_agent,
            full_name: None,
        }
    }

    fn log(&self, result: &Result<Accepted, GatewayError>) {
        let full_name = self.full_name.as_deref().unwrap_or("-");
        match result {
            Ok(accepted) => tracing::info!(
                ip = %self.ip,
                origin = %self.origin,
                user_agent = %self.user_agent,
                full_name,
                outcome = accepted.outcome(),
                "Submission request handled"
            ),
            Err(e @ (GatewayError::Configuration | GatewayError::Internal(_))) => tracing::error!(
                ip = %self.ip,
                origin = %self.origin,
                user_agent = %self.user_agent,
                full_name,
                outcome = e.outcome(),
                error = %e,
                "Submission request failed"
            ),
            Err(e) => tracing::warn!(
                ip = %self.ip,
                origin = %self.origin,
                user_agent = %self.user_agent,
                full_name,
                outcome = e.outcome(),
                status = e.status_code().as_u16(),
                error = %e,
                "Submission request rejected"
            ),
        }
    }
}

/// Shortens a submitter name before it is written to logs.
pub fn truncate_for_log(full_name: &str) -> String {
    match full_name.char_indices().nth(MAX_LOGGED_NAME_CHARS) {
        Some((idx, _)) => format!("{}…", &full_name[..idx]),
        None => full_name.to_string(),
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Validates submissions, suppresses repeats through the dedup cache and
/// forwards new leads to the record store.
pub struct Gateway {
    cache: Arc<DedupCache>,
    record_store: Option<Arc<dyn RecordStore>>,
    allowed_origin: HeaderValue,
}

impl Gateway {
    pub fn new(
        cache: Arc<DedupCache>,
        record_store: Option<Arc<dyn RecordStore>>,
        allowed_origin: HeaderValue,
    ) -> Self {
        Gateway {
            cache,
            record_store,
            allowed_origin,
        }
    }

    /// Ready once the record store credentials are configured.
    pub fn is_ready(&self) -> bool {
        self.record_store.is_some()
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<Bytes>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let start = Instant::now();
        let mut context = RequestContext::from_request(&req);

        let result = self.process(req, &mut context).await;
        context.log(&result);

        let (outcome, mut response) = match &result {
            Ok(accepted) => (accepted.outcome(), accepted.to_response()),
            Err(e) => (e.outcome(), e.to_response()),
        };
        self.add_cors_headers(response.headers_mut());

        counter!(SUBMISSION_REQUESTS, "outcome" => outcome).increment(1);
        histogram!(REQUEST_DURATION, "outcome" => outcome).record(start.elapsed().as_secs_f64());

        response
    }

    async fn process<B>(
        &self,
        req: Request<B>,
        context: &mut RequestContext,
    ) -> Result<Accepted, GatewayError>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match *req.method() {
            Method::OPTIONS => return Ok(Accepted::Preflight),
            Method::POST => {}
            _ => return Err(GatewayError::MethodNotAllowed),
        }

        let record_store = self
            .record_store
            .as_ref()
            .ok_or(GatewayError::Configuration)?;

        let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
            .collect()
            .await
            .map_err(|e| GatewayError::Internal(format!("Failed to read request body: {e}")))?
            .to_bytes();

        let submission = Submission::parse(&body)?;
        context.full_name = Some(truncate_for_log(&submission.full_name));
        let identity = normalize(&submission.email);

        if let CacheLookup::Duplicate { tier, .. } = self.cache.exists(&identity).await {
            return Ok(Accepted::Skipped { tier });
        }

        let record = LeadRecord {
            full_name: submission.full_name,
            email: identity.as_str().to_string(),
            submitted_at: Utc::now(),
        };

        let upstream_start = Instant::now();
        let outcome = record_store.create(&record).await;
        histogram!(UPSTREAM_REQUEST_DURATION).record(upstream_start.elapsed().as_secs_f64());

        match outcome? {
            CreateOutcome::Created { id } => {
                self.cache.record(&identity).await;
                Ok(Accepted::Created { id })
            }
            CreateOutcome::Rejected { status, body } if is_duplicate_rejection(status, &body) => {
                self.cache.record(&identity).await;
                Ok(Accepted::UpstreamDuplicate {
                    message: error_message(&body),
                })
            }
            CreateOutcome::Rejected { status, body } => Err(GatewayError::Upstream {
                status,
                details: truncate_chars(&body, MAX_DETAILS_CHARS),
            }),
        }
    }

    fn add_cors_headers(&self, headers: &mut HeaderMap) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, self.allowed_origin.clone());
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("POST, OPTIONS"),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        );
    }
}
