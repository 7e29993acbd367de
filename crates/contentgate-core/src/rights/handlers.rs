//! Per-usage-type rule handlers.
//!
//! Dispatch is a plain match on [`UsageTag`] returning a function pointer;
//! each handler inspects the reference and its usage context and returns a
//! [`Finding`]. Scoring and risk bands are applied afterwards by the
//! evaluator, uniformly for every tag.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::patterns::{find_across, is_commentary, is_impersonation, PhraseSet};
use super::registry::RightsRegistry;
use crate::domain::{LicenseStatus, Reference, RewriteDirective, UsageContext, UsageTag, Verdict};

/// Base risk per usage type and outcome.
pub mod base_risk {
    pub const PUBLIC_DOMAIN_CONFIRMED: u8 = 5;
    pub const LICENSED_VALID: u8 = 10;
    pub const STYLE_ONLY: u8 = 20;
    pub const COMMENTARY: u8 = 30;
    pub const PUBLIC_DOMAIN_UNCONFIRMED: u8 = 60;
    pub const LICENSED_INVALID: u8 = 90;
    pub const UNRECOGNIZED: u8 = 100;
}

/// Scopes a license must grant for social commerce content.
const REQUIRED_SCOPES: [&str; 2] = ["commercial", "social"];

pub(crate) struct Assessment<'a> {
    pub reference: &'a Reference,
    pub context: &'a UsageContext,
    pub registry: &'a RightsRegistry,
    pub now: DateTime<Utc>,
}

impl Assessment<'_> {
    /// Reference flags plus registry trademarks found in the usage context.
    fn protected_elements(&self) -> BTreeSet<String> {
        let own = PhraseSet::new(&self.reference.flagged_elements);
        find_across(&self.context.text, [&own, self.registry.trademarks()])
    }

    fn own_elements(&self) -> BTreeSet<String> {
        PhraseSet::new(&self.reference.flagged_elements).find_in(&self.context.text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Finding {
    pub verdict: Verdict,
    pub base_risk: u8,
    pub reason: String,
    pub rewrite: Option<(String, RewriteDirective)>,
    /// Distinct protected elements found; each adds to the risk score
    pub elements: BTreeSet<String>,
}

impl Finding {
    fn approve(base_risk: u8, reason: impl Into<String>, elements: BTreeSet<String>) -> Self {
        Self {
            verdict: Verdict::Approve,
            base_risk,
            reason: reason.into(),
            rewrite: None,
            elements,
        }
    }

    fn reject(base_risk: u8, reason: impl Into<String>, elements: BTreeSet<String>) -> Self {
        Self {
            verdict: Verdict::Reject,
            base_risk,
            reason: reason.into(),
            rewrite: None,
            elements,
        }
    }

    fn rewrite(
        base_risk: u8,
        reason: impl Into<String>,
        instructions: impl Into<String>,
        directive: RewriteDirective,
        elements: BTreeSet<String>,
    ) -> Self {
        Self {
            verdict: Verdict::Rewrite,
            base_risk,
            reason: reason.into(),
            rewrite: Some((instructions.into(), directive)),
            elements,
        }
    }
}

pub(crate) type Handler = fn(&Assessment<'_>) -> Finding;

pub(crate) fn handler_for(tag: &UsageTag) -> Handler {
    match tag {
        UsageTag::Licensed => licensed,
        UsageTag::PublicDomain => public_domain,
        UsageTag::StyleOnly => style_only,
        UsageTag::Commentary => commentary,
        UsageTag::Unrecognized(_) => unrecognized,
    }
}

fn join(elements: &BTreeSet<String>) -> String {
    elements.iter().cloned().collect::<Vec<_>>().join(", ")
}

fn licensed(a: &Assessment<'_>) -> Finding {
    use base_risk::{LICENSED_INVALID, LICENSED_VALID};

    let elements = a.protected_elements();
    let Some(proof) = &a.reference.license else {
        return Finding::reject(
            LICENSED_INVALID,
            "licensed reference has no proof-of-license on file",
            elements,
        );
    };
    let id = &proof.license_id;

    if proof.status != LicenseStatus::Active {
        let status = match proof.status {
            LicenseStatus::Active => "active",
            LicenseStatus::Pending => "pending",
            LicenseStatus::Expired => "expired",
            LicenseStatus::Revoked => "revoked",
        };
        return Finding::reject(
            LICENSED_INVALID,
            format!("license {id} is {status}, not active"),
            elements,
        );
    }
    if proof.is_expired(a.now) {
        let when = proof
            .expires_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        return Finding::reject(
            LICENSED_INVALID,
            format!("license {id} expired at {when}"),
            elements,
        );
    }
    if let Some(missing) = REQUIRED_SCOPES.iter().find(|s| !proof.covers(s)) {
        return Finding::reject(
            LICENSED_INVALID,
            format!("license {id} does not cover {missing} use"),
            elements,
        );
    }
    if proof.proof_uri.as_deref().map_or(true, |u| u.trim().is_empty()) {
        return Finding::reject(
            LICENSED_INVALID,
            format!("license {id} has no proof document on file"),
            elements,
        );
    }

    Finding::approve(
        LICENSED_VALID,
        format!("license {id} is active, unexpired and covers commercial and social use"),
        elements,
    )
}

fn public_domain(a: &Assessment<'_>) -> Finding {
    use base_risk::{PUBLIC_DOMAIN_CONFIRMED, PUBLIC_DOMAIN_UNCONFIRMED};

    let elements = a.protected_elements();
    if a.registry.is_public_domain_confirmed(&a.reference.id) {
        Finding::approve(
            PUBLIC_DOMAIN_CONFIRMED,
            "public-domain status independently confirmed",
            elements,
        )
    } else {
        Finding::reject(
            PUBLIC_DOMAIN_UNCONFIRMED,
            "public-domain status is not independently confirmed",
            elements,
        )
    }
}

fn style_only(a: &Assessment<'_>) -> Finding {
    use base_risk::STYLE_ONLY;

    let elements = a.protected_elements();
    if elements.is_empty() {
        return Finding::approve(
            STYLE_ONLY,
            "style-only usage names no protected elements",
            elements,
        );
    }

    let list = join(&elements);
    Finding::rewrite(
        STYLE_ONLY,
        format!("style-only usage names protected elements: {list}"),
        format!("Remove these specific elements and keep only the general style: {list}"),
        RewriteDirective::StripElements {
            elements: elements.iter().cloned().collect(),
        },
        elements,
    )
}

fn commentary(a: &Assessment<'_>) -> Finding {
    use base_risk::COMMENTARY;

    let text = &a.context.text;
    // Naming the work is expected in commentary; only the reference's own
    // flagged elements (logos, signature phrases) count against it.
    let elements = a.own_elements();

    if is_impersonation(text) {
        return Finding::rewrite(
            COMMENTARY,
            "usage reads as promotional impersonation of the rights holder",
            "Reframe as independent review or commentary and drop endorsement language",
            RewriteDirective::ReframeAsCommentary,
            elements,
        );
    }
    if !is_commentary(text) {
        return Finding::rewrite(
            COMMENTARY,
            "usage is not clearly framed as review or commentary",
            "State explicitly that this is a review or commentary",
            RewriteDirective::ReframeAsCommentary,
            elements,
        );
    }
    if !elements.is_empty() {
        let list = join(&elements);
        return Finding::rewrite(
            COMMENTARY,
            format!("commentary reproduces protected elements: {list}"),
            format!("Refer to the work without reproducing: {list}"),
            RewriteDirective::StripElements {
                elements: elements.iter().cloned().collect(),
            },
            elements,
        );
    }

    Finding::approve(COMMENTARY, "usage is framed as review or commentary", elements)
}

fn unrecognized(a: &Assessment<'_>) -> Finding {
    Finding::reject(
        base_risk::UNRECOGNIZED,
        format!("unrecognized usage type '{}'", a.reference.usage),
        BTreeSet::new(),
    )
}
