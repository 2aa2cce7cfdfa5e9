use crate::config::ValidationError;
use crate::record_store::RecordStoreError;
use dedup_cache::durable::StoreError;
use http::StatusCode;
use hyper::body::Bytes;
use hyper::Response;
use serde_json::json;
use shared::http::json_response;
use thiserror::Error;

/// Errors that stop the service from starting or serving
#[derive(Error, Debug)]
pub enum SubmissionGatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("invalid allowed origin: {0}")]
    InvalidAllowedOrigin(#[from] http::header::InvalidHeaderValue),

    #[error("could not set up durable dedup store: {0}")]
    DurableStore(#[from] StoreError),

    #[error("could not set up record store client: {0}")]
    RecordStore(#[from] RecordStoreError),
}

/// Request-level failures. Each maps to the status and JSON body the caller sees.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Server configuration error")]
    Configuration,

    #[error("Missing required fields: fullName and email")]
    MissingFields,

    #[error("Failed to submit to Airtable")]
    Upstream { status: StatusCode, details: String },

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::Configuration | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::MissingFields => StatusCode::BAD_REQUEST,
            GatewayError::Upstream { status, .. } => *status,
        }
    }

    /// Outcome category used for logs and metrics
    pub fn outcome(&self) -> &'static str {
        match self {
            GatewayError::MethodNotAllowed => "method_not_allowed",
            GatewayError::Configuration => "configuration_error",
            GatewayError::MissingFields => "invalid_payload",
            GatewayError::Upstream { .. } => "upstream_error",
            GatewayError::Internal(_) => "unexpected_error",
        }
    }

    pub fn to_response(&self) -> Response<Bytes> {
        let body = match self {
            GatewayError::Upstream { status, details } => json!({
                "error": "Failed to submit to Airtable",
                "status": status.as_u16(),
                "details": details,
            }),
            GatewayError::Internal(message) => json!({
                "error": "Internal server error",
                "message": message,
            }),
            other => json!({ "error": other.to_string() }),
        };
        json_response(self.status_code(), &body)
    }
}

impl From<RecordStoreError> for GatewayError {
    fn from(e: RecordStoreError) -> Self {
        GatewayError::Internal(e.to_string())
    }
}
