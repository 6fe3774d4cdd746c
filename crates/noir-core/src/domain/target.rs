//! Investigation subjects and input normalization.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::error::TargetError;

const MAX_TARGET_LEN: usize = 2048;

/// Category of an investigation subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Domain,
    Company,
    Url,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Company => "company",
            Self::Url => "url",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "domain" => Ok(Self::Domain),
            "company" => Ok(Self::Company),
            "url" => Ok(Self::Url),
            other => Err(TargetError::UnknownKind(other.to_string())),
        }
    }
}

/// Immutable identity of the subject under investigation.
///
/// `value` is the normalized form every planner and primitive operates on;
/// `raw` keeps the user's original input for the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    kind: TargetKind,
    value: String,
    raw: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

impl Target {
    /// Normalize `raw` according to `kind`.
    pub fn new(kind: TargetKind, raw: impl Into<String>) -> Result<Self, TargetError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TargetError::Empty);
        }
        if trimmed.len() > MAX_TARGET_LEN {
            return Err(TargetError::TooLong {
                len: trimmed.len(),
                max: MAX_TARGET_LEN,
            });
        }
        let value = match kind {
            TargetKind::Domain => normalize_domain(trimmed)?,
            TargetKind::Url => normalize_url(trimmed)?,
            TargetKind::Company => normalize_company(trimmed),
        };
        Ok(Self {
            kind,
            value,
            raw,
            metadata: BTreeMap::new(),
        })
    }

    pub fn domain(raw: impl Into<String>) -> Result<Self, TargetError> {
        Self::new(TargetKind::Domain, raw)
    }

    pub fn company(raw: impl Into<String>) -> Result<Self, TargetError> {
        Self::new(TargetKind::Company, raw)
    }

    pub fn url(raw: impl Into<String>) -> Result<Self, TargetError> {
        Self::new(TargetKind::Url, raw)
    }

    /// Attach a metadata entry (source, notes). Only available before the
    /// target is handed to an investigation, which takes it by value.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Registrable host for domain and url targets (`www.` and port removed).
    pub fn host(&self) -> Option<String> {
        match self.kind {
            TargetKind::Domain => Some(self.value.clone()),
            TargetKind::Url => normalize_domain(&self.value).ok(),
            TargetKind::Company => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

fn is_domain(host: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+(?:[a-z]{2,63}|xn--[a-z0-9-]{1,59})$")
                .ok()
        })
        .as_ref()
        .is_some_and(|re| re.is_match(host))
}

fn strip_scheme(s: &str) -> &str {
    s.split_once("://").map_or(s, |(_, rest)| rest)
}

/// Host portion of an authority-and-path string: drops path, query,
/// fragment, userinfo and port.
fn host_part(s: &str) -> &str {
    let end = s.find(['/', '?', '#']).unwrap_or(s.len());
    let authority = &s[..end];
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    host.split(':').next().unwrap_or(host)
}

fn normalize_domain(input: &str) -> Result<String, TargetError> {
    let lowered = input.trim().to_ascii_lowercase();
    let host = host_part(strip_scheme(&lowered)).trim_end_matches('.');
    let host = host.strip_prefix("www.").unwrap_or(host);
    if is_domain(host) {
        Ok(host.to_string())
    } else {
        Err(TargetError::InvalidDomain(input.to_string()))
    }
}

fn normalize_url(input: &str) -> Result<String, TargetError> {
    let (scheme, rest) = match input.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => ("https".to_string(), input),
    };
    if scheme != "http" && scheme != "https" {
        return Err(TargetError::UnsupportedScheme(scheme));
    }

    let split = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(split);
    let authority = authority
        .rsplit_once('@')
        .map_or(authority, |(_, h)| h)
        .to_ascii_lowercase();
    let host = authority.split(':').next().unwrap_or_default();
    let host = host.trim_end_matches('.');
    if !is_domain(host) {
        return Err(TargetError::InvalidUrl(input.to_string()));
    }

    let path = if tail.is_empty() { "/" } else { tail };
    Ok(format!("{scheme}://{authority}{path}"))
}

fn normalize_company(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_normalization_strips_scheme_www_and_path() {
        let t = Target::domain("https://www.Example.COM/page?q=1").unwrap();
        assert_eq!(t.value(), "example.com");
        assert_eq!(t.raw(), "https://www.Example.COM/page?q=1");
        assert_eq!(t.kind(), TargetKind::Domain);
    }

    #[test]
    fn test_domain_normalization_drops_port_and_trailing_dot() {
        let t = Target::domain("shop.example.org.:8443").unwrap();
        assert_eq!(t.value(), "shop.example.org");
    }

    #[test]
    fn test_invalid_domain_rejected() {
        assert!(matches!(
            Target::domain("not a domain"),
            Err(TargetError::InvalidDomain(_))
        ));
        assert!(matches!(Target::domain("   "), Err(TargetError::Empty)));
        assert!(Target::domain("-bad-.com").is_err());
    }

    #[test]
    fn test_url_normalization_defaults_to_https() {
        let t = Target::url("Deals.Example.com/checkout").unwrap();
        assert_eq!(t.value(), "https://deals.example.com/checkout");
        assert_eq!(t.host().as_deref(), Some("deals.example.com"));
    }

    #[test]
    fn test_url_keeps_path_case_and_port() {
        let t = Target::url("http://WWW.Example.com:8080/Path").unwrap();
        assert_eq!(t.value(), "http://www.example.com:8080/Path");
        assert_eq!(t.host().as_deref(), Some("example.com"));
    }

    #[test]
    fn test_url_rejects_other_schemes() {
        assert!(matches!(
            Target::url("ftp://example.com"),
            Err(TargetError::UnsupportedScheme(s)) if s == "ftp"
        ));
    }

    #[test]
    fn test_company_whitespace_collapsed() {
        let t = Target::company("  Acme   Corporation ").unwrap();
        assert_eq!(t.value(), "acme corporation");
        assert!(t.host().is_none());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("URL".parse::<TargetKind>().unwrap(), TargetKind::Url);
        assert!("ip".parse::<TargetKind>().is_err());
    }
}
