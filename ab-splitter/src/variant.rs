//! Deterministic variant assignment for the landing page test.
//!
//! Visitors without a pinned variant are bucketed by hashing their IP and
//! user agent with the same 32-bit string hash the pages used historically,
//! so a returning visitor without cookies keeps landing on the same page.

use std::fmt;

pub const COOKIE_NAME: &str = "ab_variant";

/// Thirty days.
pub const COOKIE_MAX_AGE_SECS: u32 = 2_592_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    A,
    B,
}

impl Variant {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Variant::A => "A",
            Variant::B => "B",
        }
    }

    /// Asset served for this variant.
    pub const fn path(&self) -> &'static str {
        match self {
            Variant::A => "/index.html",
            Variant::B => "/index-b.html",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "A" => Some(Variant::A),
            "B" => Some(Variant::B),
            _ => None,
        }
    }

    pub fn from_hash(hash: u32) -> Self {
        if hash % 2 == 0 { Variant::A } else { Variant::B }
    }

    /// `Set-Cookie` value pinning this variant.
    pub fn cookie(&self) -> String {
        format!(
            "{COOKIE_NAME}={}; Path=/; Max-Age={COOKIE_MAX_AGE_SECS}; SameSite=Lax",
            self.as_str()
        )
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentSource {
    Cookie,
    Hash,
}

impl AssignmentSource {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AssignmentSource::Cookie => "cookie",
            AssignmentSource::Hash => "hash",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub variant: Variant,
    pub source: AssignmentSource,
}

/// Only the root document takes part in the test.
pub fn is_landing_path(path: &str) -> bool {
    path == "/" || path == "/index.html"
}

/// `h = h * 31 + c` over UTF-16 code units with 32-bit wraparound, then the
/// absolute value.
pub fn simple_hash(s: &str) -> u32 {
    let hash = s.encode_utf16().fold(0i32, |h, c| {
        h.wrapping_shl(5).wrapping_sub(h).wrapping_add(i32::from(c))
    });
    hash.unsigned_abs()
}

/// Finds the first `ab_variant` entry in a `Cookie` header value. Values other
/// than `A` or `B` are ignored.
pub fn variant_from_cookie(cookie_header: &str) -> Option<Variant> {
    cookie_header
        .split(';')
        .filter_map(|pair| {
            let mut parts = pair.trim().split('=');
            Some((parts.next()?, parts.next().unwrap_or_default()))
        })
        .find(|(name, _)| *name == COOKIE_NAME)
        .and_then(|(_, value)| Variant::parse(value.trim()))
}

/// Picks the variant from the pinned cookie when present, otherwise from the
/// hash of `client_ip` followed by `user_agent`.
pub fn assign(cookie_header: Option<&str>, client_ip: &str, user_agent: &str) -> Assignment {
    if let Some(variant) = cookie_header.and_then(variant_from_cookie) {
        return Assignment {
            variant,
            source: AssignmentSource::Cookie,
        };
    }

    let identifier = format!("{client_ip}{user_agent}");
    Assignment {
        variant: Variant::from_hash(simple_hash(&identifier)),
        source: AssignmentSource::Hash,
    }
}
