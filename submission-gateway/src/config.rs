use dedup_cache::config::DedupConfig;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Airtable timeout_secs cannot be 0")]
    InvalidTimeout,

    #[error("Empty Airtable field name for {0}")]
    EmptyFieldName(&'static str),

    #[error("Empty source tag")]
    EmptySource,

    #[error("Empty allowed origin")]
    EmptyAllowedOrigin,
}

fn default_allowed_origin() -> String {
    "*".into()
}

/// Submission gateway configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for form submissions
    pub listener: Listener,
    /// Listener for `/health` and `/ready`
    pub admin_listener: Listener,
    /// Value of `Access-Control-Allow-Origin` on every response
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,
    #[serde(default)]
    pub airtable: AirtableConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.allowed_origin.trim().is_empty() {
            return Err(ValidationError::EmptyAllowedOrigin);
        }

        self.airtable.validate()
    }

    /// Applies `AIRTABLE_*` environment variables on top of the file values.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.airtable.apply_env_overrides(lookup);
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

fn default_api_url() -> Url {
    Url::parse("https://api.airtable.com/v0").expect("default Airtable API url is valid")
}

fn default_source() -> String {
    "free_guide_landing_page".into()
}

fn default_timeout_secs() -> u64 {
    10
}

/// Upstream record store settings. The credentials are optional so the
/// service can start without them; every submission then fails with a
/// configuration error until they are provided.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AirtableConfig {
    #[serde(default)]
    pub base_id: Option<String>,
    #[serde(default)]
    pub table_id: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: Url,
    /// Constant written to the source field of every record
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub fields: FieldMapping,
}

impl Default for AirtableConfig {
    fn default() -> Self {
        AirtableConfig {
            base_id: None,
            table_id: None,
            api_token: None,
            api_url: default_api_url(),
            source: default_source(),
            timeout_secs: default_timeout_secs(),
            fields: FieldMapping::default(),
        }
    }
}

pub struct AirtableCredentials<'a> {
    pub base_id: &'a str,
    pub table_id: &'a str,
    pub api_token: &'a str,
}

impl AirtableConfig {
    /// Returns the credentials only when all three are set and non-empty.
    pub fn credentials(&self) -> Option<AirtableCredentials<'_>> {
        Some(AirtableCredentials {
            base_id: non_empty(&self.base_id)?,
            table_id: non_empty(&self.table_id)?,
            api_token: non_empty(&self.api_token)?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.source.trim().is_empty() {
            return Err(ValidationError::EmptySource);
        }
        self.fields.validate()
    }

    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty variables count as unset.
        let env = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(value) = env("AIRTABLE_BASE_ID") {
            self.base_id = Some(value);
        }
        if let Some(value) = env("AIRTABLE_TABLE_ID") {
            self.table_id = Some(value);
        }
        if let Some(value) = env("AIRTABLE_API_TOKEN") {
            self.api_token = Some(value);
        }

        let fields = &mut self.fields;
        for (name, field) in [
            ("AIRTABLE_FIELD_FULLNAME", &mut fields.full_name),
            ("AIRTABLE_FIELD_EMAIL", &mut fields.email),
            ("AIRTABLE_FIELD_SOURCE", &mut fields.source),
            ("AIRTABLE_FIELD_SUBMITTED_AT", &mut fields.submitted_at),
        ] {
            if let Some(value) = env(name) {
                *field = value;
            }
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn default_full_name_field() -> String {
    "Full Name".into()
}

fn default_email_field() -> String {
    "Email".into()
}

fn default_source_field() -> String {
    "Source".into()
}

fn default_submitted_at_field() -> String {
    "Submitted At".into()
}

/// Column names used in the Airtable table
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct FieldMapping {
    #[serde(default = "default_full_name_field")]
    pub full_name: String,
    #[serde(default = "default_email_field")]
    pub email: String,
    #[serde(default = "default_source_field")]
    pub source: String,
    #[serde(default = "default_submitted_at_field")]
    pub submitted_at: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        FieldMapping {
            full_name: default_full_name_field(),
            email: default_email_field(),
            source: default_source_field(),
            submitted_at: default_submitted_at_field(),
        }
    }
}

impl FieldMapping {
    fn validate(&self) -> Result<(), ValidationError> {
        for (label, value) in [
            ("full_name", &self.full_name),
            ("email", &self.email),
            ("source", &self.source),
            ("submitted_at", &self.submitted_at),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::EmptyFieldName(label));
            }
        }
        Ok(())
    }
}
