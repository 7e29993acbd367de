//! Rights evaluator outcomes per usage type.

mod common;

use chrono::Duration;
use common::t0;
use contentgate_core::rights::patterns::{reframe_as_commentary, strip_elements};
use contentgate_core::{
    LicenseProof, LicenseStatus, PipelineConfig, Reference, RewriteDirective, RightsEvaluator,
    RightsRegistry, UsageContext, UsageTag, Verdict,
};

fn evaluator(registry: RightsRegistry) -> RightsEvaluator {
    RightsEvaluator::new(registry, &PipelineConfig::default())
}

fn ctx(reference_id: &str, text: &str) -> UsageContext {
    UsageContext::new(reference_id, text)
}

fn active_license(id: &str) -> LicenseProof {
    LicenseProof::new(id, LicenseStatus::Active)
        .with_scopes(["commercial", "social"])
        .with_proof_uri("s3://licenses/doc.pdf")
}

#[test]
fn test_usage_tags_parse_loosely() {
    assert_eq!(UsageTag::from("Licensed_Direct"), UsageTag::Licensed);
    assert_eq!(UsageTag::from("public_domain"), UsageTag::PublicDomain);
    assert_eq!(UsageTag::from(" STYLE-ONLY "), UsageTag::StyleOnly);
    assert_eq!(
        UsageTag::from("fan-art"),
        UsageTag::Unrecognized("fan-art".to_string())
    );
}

#[test]
fn test_valid_license_is_approved_at_low_risk() {
    let eval = evaluator(RightsRegistry::with_known_trademarks());
    let r = Reference::new("r1", "photo set", "licensed").with_license(active_license("L-1"));
    let d = eval.evaluate(&r, &ctx("r1", "lamp on a desk"), t0()).unwrap();
    assert_eq!(d.verdict, Verdict::Approve);
    assert_eq!(d.risk_score, Some(10));
    assert!(!d.requires_review);
    assert!(d.reason.contains("L-1"));
}

#[test]
fn test_license_problems_reject() {
    let eval = evaluator(RightsRegistry::with_known_trademarks());
    let cases = [
        (None, "no proof-of-license"),
        (
            Some(LicenseProof::new("L-2", LicenseStatus::Pending)),
            "license L-2 is pending",
        ),
        (
            Some(active_license("L-3").expiring(t0() - Duration::days(1))),
            "license L-3 expired at",
        ),
        (
            Some(
                LicenseProof::new("L-4", LicenseStatus::Active)
                    .with_scopes(["commercial"])
                    .with_proof_uri("s3://l4.pdf"),
            ),
            "does not cover social use",
        ),
        (
            Some(
                LicenseProof::new("L-5", LicenseStatus::Active).with_scopes(["commercial", "social"]),
            ),
            "no proof document",
        ),
    ];

    for (license, expected) in cases {
        let mut r = Reference::new("r1", "photo set", "licensed");
        if let Some(l) = license {
            r = r.with_license(l);
        }
        let d = eval.evaluate(&r, &ctx("r1", "lamp on a desk"), t0()).unwrap();
        assert_eq!(d.verdict, Verdict::Reject, "{expected}");
        assert_eq!(d.risk_score, Some(90));
        assert!(d.reason.contains(expected), "{} !~ {expected}", d.reason);
    }
}

#[test]
fn test_license_expiring_exactly_now_is_expired() {
    let eval = evaluator(RightsRegistry::default());
    let r = Reference::new("r1", "photo set", "licensed")
        .with_license(active_license("L-1").expiring(t0()));
    let d = eval.evaluate(&r, &ctx("r1", "lamp"), t0()).unwrap();
    assert_eq!(d.verdict, Verdict::Reject);
}

#[test]
fn test_public_domain_requires_confirmation() {
    let r = Reference::new("pd", "Great Wave", "public-domain");

    let d = evaluator(RightsRegistry::default())
        .evaluate(&r, &ctx("pd", "wave pattern backdrop"), t0())
        .unwrap();
    assert_eq!(d.verdict, Verdict::Reject);
    assert_eq!(d.risk_score, Some(60));
    assert!(!d.requires_review);

    let mut registry = RightsRegistry::default();
    registry.confirm_public_domain("pd");
    let d = evaluator(registry)
        .evaluate(&r, &ctx("pd", "wave pattern backdrop"), t0())
        .unwrap();
    assert_eq!(d.verdict, Verdict::Approve);
    assert_eq!(d.risk_score, Some(5));
}

#[test]
fn test_style_only_with_trademark_is_stripped() {
    let eval = evaluator(RightsRegistry::with_known_trademarks());
    let r = Reference::new("s1", "anime palette", "style-only");
    let d = eval
        .evaluate(&r, &ctx("s1", "desk in Tanjiro colors"), t0())
        .unwrap();
    assert_eq!(d.verdict, Verdict::Rewrite);
    assert_eq!(d.risk_score, Some(25));
    assert_eq!(
        d.directive,
        Some(RewriteDirective::StripElements {
            elements: vec!["Tanjiro".to_string()]
        })
    );
    assert!(d.rewrite_instructions.unwrap().contains("Tanjiro"));

    let d = eval
        .evaluate(&r, &ctx("s1", "desk in soft pastel colors"), t0())
        .unwrap();
    assert_eq!(d.verdict, Verdict::Approve);
    assert_eq!(d.risk_score, Some(20));
}

#[test]
fn test_trademark_match_is_whole_word() {
    let eval = evaluator(RightsRegistry::with_known_trademarks());
    let r = Reference::new("s1", "palette", "style-only");
    // "thorough" must not match "thor"
    let d = eval
        .evaluate(&r, &ctx("s1", "a thorough desk cleanup"), t0())
        .unwrap();
    assert_eq!(d.verdict, Verdict::Approve);
}

#[test]
fn test_punctuated_flagged_elements_are_matched() {
    let mut registry = RightsRegistry::default();
    registry.add_trademark("C++ Guru");
    let eval = evaluator(registry);
    let r = Reference::new("s1", "ink style", "style-only").with_flagged(["Believe it!", "#Hokage"]);

    let d = eval
        .evaluate(
            &r,
            &ctx("s1", "Bright ink style, catchphrase Believe it! and tag #Hokage"),
            t0(),
        )
        .unwrap();
    assert_eq!(d.verdict, Verdict::Rewrite);
    assert_eq!(d.risk_score, Some(30));
    assert_eq!(
        d.directive,
        Some(RewriteDirective::StripElements {
            elements: vec!["#Hokage".to_string(), "Believe it!".to_string()]
        })
    );

    let d = eval
        .evaluate(&r, &ctx("s1", "sticker pack for the c++ guru"), t0())
        .unwrap();
    assert_eq!(d.verdict, Verdict::Rewrite);
    assert!(d.reason.contains("c++ guru"));

    // stripped text passes, flags still price the reference
    let stripped = strip_elements(
        "Bright ink style, catchphrase Believe it! and tag #Hokage",
        &["#Hokage".into(), "Believe it!".into()],
    );
    let d = eval.evaluate(&r, &ctx("s1", &stripped), t0()).unwrap();
    assert_eq!(d.verdict, Verdict::Approve);
    assert_eq!(d.risk_score, Some(30));
}

#[test]
fn test_commentary_framing_rules() {
    let eval = evaluator(RightsRegistry::with_known_trademarks());
    let r = Reference::new("c1", "Demon Slayer S3", "commentary");

    let d = eval
        .evaluate(&r, &ctx("c1", "official Demon Slayer desk setup"), t0())
        .unwrap();
    assert_eq!(d.verdict, Verdict::Rewrite);
    assert_eq!(d.directive, Some(RewriteDirective::ReframeAsCommentary));
    assert!(d.reason.contains("impersonation"));

    let d = eval
        .evaluate(&r, &ctx("c1", "Demon Slayer themed desk"), t0())
        .unwrap();
    assert_eq!(d.verdict, Verdict::Rewrite);
    assert_eq!(d.directive, Some(RewriteDirective::ReframeAsCommentary));

    // naming the work inside a review is fine
    let d = eval
        .evaluate(&r, &ctx("c1", "my review of Demon Slayer season 3"), t0())
        .unwrap();
    assert_eq!(d.verdict, Verdict::Approve);
    assert_eq!(d.risk_score, Some(30));
}

#[test]
fn test_blocked_and_unrecognized_references_score_maximum() {
    let mut registry = RightsRegistry::with_known_trademarks();
    registry.block("leak", "unreleased footage");
    let eval = evaluator(registry);

    let r = Reference::new("leak", "trailer", "licensed").with_license(active_license("L-1"));
    let d = eval.evaluate(&r, &ctx("leak", "teaser"), t0()).unwrap();
    assert_eq!(d.verdict, Verdict::Reject);
    assert_eq!(d.risk_score, Some(100));
    assert_eq!(d.reason, "reference is blocked: unreleased footage");

    let r = Reference::new("x", "meme", "parody");
    let d = eval.evaluate(&r, &ctx("x", "meme"), t0()).unwrap();
    assert_eq!(d.verdict, Verdict::Reject);
    assert_eq!(d.risk_score, Some(100));
}

#[test]
fn test_rewrite_helpers() {
    assert_eq!(
        strip_elements("Tanjiro and Nezuko desk", &["tanjiro".into(), "nezuko".into()]),
        "and desk"
    );
    assert_eq!(
        reframe_as_commentary("official merch drop"),
        "Independent review and commentary: merch drop"
    );
    assert_eq!(
        reframe_as_commentary("official review of the merch"),
        "review of the merch"
    );
}
