//! References: the cultural or source artifacts a content unit draws on.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a reference may legally be used.
///
/// Parsing never fails: any string that is not a known tag is kept as
/// `Unrecognized` so the rights evaluator can reject it explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UsageTag {
    Licensed,
    PublicDomain,
    StyleOnly,
    Commentary,
    Unrecognized(String),
}

impl From<String> for UsageTag {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "licensed" | "licensed-direct" => UsageTag::Licensed,
            "public-domain" => UsageTag::PublicDomain,
            "style-only" => UsageTag::StyleOnly,
            "commentary" => UsageTag::Commentary,
            _ => UsageTag::Unrecognized(raw),
        }
    }
}

impl From<&str> for UsageTag {
    fn from(raw: &str) -> Self {
        UsageTag::from(raw.to_string())
    }
}

impl From<UsageTag> for String {
    fn from(tag: UsageTag) -> Self {
        tag.to_string()
    }
}

impl std::fmt::Display for UsageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UsageTag::Licensed => f.write_str("licensed"),
            UsageTag::PublicDomain => f.write_str("public-domain"),
            UsageTag::StyleOnly => f.write_str("style-only"),
            UsageTag::Commentary => f.write_str("commentary"),
            UsageTag::Unrecognized(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    Active,
    Pending,
    Expired,
    Revoked,
}

/// Proof-of-license metadata for a `licensed` reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseProof {
    pub license_id: String,
    pub status: LicenseStatus,
    /// Location of the signed license document
    #[serde(default)]
    pub proof_uri: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted usage scopes, e.g. "commercial", "social"
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

impl LicenseProof {
    pub fn new(license_id: impl Into<String>, status: LicenseStatus) -> Self {
        Self {
            license_id: license_id.into(),
            status,
            proof_uri: None,
            expires_at: None,
            scopes: BTreeSet::new(),
        }
    }

    pub fn with_proof_uri(mut self, uri: impl Into<String>) -> Self {
        self.proof_uri = Some(uri.into());
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes
            .extend(scopes.into_iter().map(|s| s.into().to_ascii_lowercase()));
        self
    }

    pub fn expiring(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn covers(&self, scope: &str) -> bool {
        self.scopes.contains(&scope.to_ascii_lowercase())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// A registered reference. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub usage: UsageTag,
    /// How the reference is meant to appear in the content
    #[serde(default)]
    pub usage_note: String,
    #[serde(default)]
    pub license: Option<LicenseProof>,
    /// Trademark or IP elements known to belong to this reference
    #[serde(default)]
    pub flagged_elements: BTreeSet<String>,
}

impl Reference {
    pub fn new(id: impl Into<String>, title: impl Into<String>, usage: impl Into<UsageTag>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            usage: usage.into(),
            usage_note: String::new(),
            license: None,
            flagged_elements: BTreeSet::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.usage_note = note.into();
        self
    }

    pub fn with_license(mut self, proof: LicenseProof) -> Self {
        self.license = Some(proof);
        self
    }

    pub fn with_flagged<I, S>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flagged_elements
            .extend(elements.into_iter().map(Into::into));
        self
    }
}

/// The text a reference will be used in, produced by reference mapping.
///
/// The rights evaluator judges the reference against this text, not against
/// the finished content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageContext {
    pub reference_id: String,
    pub text: String,
    /// Rewrite directives already applied, in order
    #[serde(default)]
    pub revisions: Vec<String>,
}

impl UsageContext {
    pub fn new(reference_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            reference_id: reference_id.into(),
            text: text.into(),
            revisions: Vec::new(),
        }
    }
}
