use std::fmt;

/// Normalized dedup key for a submitter: the email address, trimmed and lowercased.
///
/// The email is treated as an opaque string; no address validation happens here.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubmissionIdentity(String);

impl SubmissionIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SubmissionIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn normalize(email: &str) -> SubmissionIdentity {
    SubmissionIdentity(email.trim().to_lowercase())
}
