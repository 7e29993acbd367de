//! Guarded publishing: retries, breaker, rate limits, auth lockout.

mod common;

use chrono::Duration;
use common::{advance_to, brief, harness, relaxed_config, style_ref, t0};
use contentgate_core::fakes::ScriptedPublisher;
use contentgate_core::{
    Capability, CircuitState, GateError, Identity, IncidentKind, PublishError, RemoteStatus,
    UnitState,
};
use contentgate_state::{PublishLedger, PublishOutcome};

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_then_published() {
    let h = harness()
        .publisher(
            ScriptedPublisher::new("tiktok")
                .then_err(PublishError::transient("502 bad gateway"))
                .then_err(PublishError::transient("connection reset")),
        )
        .build()
        .await;
    let id = h
        .gate
        .submit(brief("cozy desk setup"), vec![style_ref("r1")])
        .await
        .unwrap();

    let status = h.gate.drive(&id).await.unwrap();
    assert_eq!(status.state, UnitState::Published);
    assert_eq!(h.publisher.calls(), 3);
    assert_eq!(h.gate.resilience().breaker_state("tiktok"), CircuitState::Closed);

    // each retried failure is on the record
    let events = h.gate.audit().events_for_session(&id).await.unwrap();
    assert_eq!(
        events.iter().filter(|e| e.action == "publish_retry").count(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_open_breaker_and_queue_until_cooldown() {
    let h = harness()
        .config(relaxed_config())
        .publisher(
            ScriptedPublisher::new("tiktok")
                .then_err(PublishError::transient("503"))
                .then_err(PublishError::transient("503"))
                .then_err(PublishError::transient("503")),
        )
        .build()
        .await;
    let id = h
        .gate
        .submit(brief("cozy desk setup"), vec![style_ref("r1")])
        .await
        .unwrap();

    let err = h.gate.drive(&id).await.unwrap_err();
    assert!(matches!(err, GateError::TransientFailure { attempts: 3, .. }));
    assert_eq!(h.gate.get_status(&id).await.unwrap().state, UnitState::QualityChecked);
    assert_eq!(h.gate.resilience().breaker_state("tiktok"), CircuitState::Open);

    let history = h.ledger.history("tiktok").await.unwrap();
    assert_eq!(history.last().unwrap().outcome, PublishOutcome::Queued);

    // breaker open: queued without calling the destination
    let t = h.gate.advance(&id).await.unwrap();
    assert_eq!(t.from, t.to);
    let status = h.gate.get_status(&id).await.unwrap();
    assert_eq!(status.retry_after, Some(t0() + Duration::minutes(15)));
    assert_eq!(h.publisher.calls(), 3);

    // still waiting
    let err = h.gate.advance(&id).await.unwrap_err();
    assert!(matches!(err, GateError::RateLimited { .. }));

    h.clock.advance(Duration::minutes(16));
    let t = h.gate.advance(&id).await.unwrap();
    assert_eq!(t.to, UnitState::Published);
    assert_eq!(h.publisher.calls(), 4);
    assert_eq!(h.gate.resilience().breaker_state("tiktok"), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_short_circuits_other_units() {
    let h = harness()
        .config(relaxed_config())
        .publisher(
            ScriptedPublisher::new("tiktok")
                .then_err(PublishError::transient("503"))
                .then_err(PublishError::transient("503"))
                .then_err(PublishError::transient("503")),
        )
        .build()
        .await;
    let a = h
        .gate
        .submit(brief("desk setup one"), vec![style_ref("r1")])
        .await
        .unwrap();
    let b = h
        .gate
        .submit(brief("desk setup two"), vec![style_ref("r1")])
        .await
        .unwrap();

    assert!(h.gate.drive(&a).await.is_err());
    let status = h.gate.drive(&b).await.unwrap();
    assert_eq!(status.state, UnitState::QualityChecked);
    assert!(status.retry_after.is_some());
    assert_eq!(h.publisher.calls(), 3);
}

#[tokio::test]
async fn test_auth_failure_locks_destination_until_reset() {
    let h = harness()
        .config(relaxed_config())
        .publisher(ScriptedPublisher::new("tiktok").then_err(PublishError::auth("token expired")))
        .build()
        .await;
    let id = h
        .gate
        .submit(brief("cozy desk setup"), vec![style_ref("r1")])
        .await
        .unwrap();

    let err = h.gate.drive(&id).await.unwrap_err();
    assert!(matches!(err, GateError::AuthFailure { .. }));
    assert_eq!(h.gate.incidents().open_for(IncidentKind::AuthFailure), 1);
    assert!(h.gate.resilience().is_locked("tiktok"));

    // locked: refused before the destination is called
    let err = h.gate.advance(&id).await.unwrap_err();
    assert!(matches!(err, GateError::AuthFailure { .. }));
    assert_eq!(h.publisher.calls(), 1);

    h.gate
        .reset_auth("tiktok", &Identity::elevated("ops-lead"))
        .await
        .unwrap();
    assert_eq!(h.gate.incidents().open_for(IncidentKind::AuthFailure), 0);
    let t = h.gate.advance(&id).await.unwrap();
    assert_eq!(t.to, UnitState::Published);
    assert_eq!(h.publisher.calls(), 2);
}

#[tokio::test]
async fn test_auth_reset_requires_elevated_identity_and_is_audited() {
    let h = harness()
        .config(relaxed_config())
        .publisher(ScriptedPublisher::new("tiktok").then_err(PublishError::auth("token expired")))
        .build()
        .await;
    let id = h
        .gate
        .submit(brief("cozy desk setup"), vec![style_ref("r1")])
        .await
        .unwrap();
    assert!(h.gate.drive(&id).await.is_err());

    let err = h
        .gate
        .reset_auth("tiktok", &Identity::operator("night-shift"))
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Unauthorized(_)));
    assert!(h.gate.resilience().is_locked("tiktok"));
    assert_eq!(h.gate.incidents().open_for(IncidentKind::AuthFailure), 1);

    let events = h.gate.audit().events_for_session("tiktok").await.unwrap();
    let denied = events.last().unwrap();
    assert_eq!(denied.action, "auth_reset_denied");
    assert_eq!(denied.actor, "night-shift");

    h.gate
        .reset_auth("tiktok", &Identity::elevated("ops-lead"))
        .await
        .unwrap();
    assert!(!h.gate.resilience().is_locked("tiktok"));
    assert_eq!(h.gate.incidents().open_for(IncidentKind::AuthFailure), 0);
    assert_eq!(h.gate.incidents().list().len(), 1);

    let events = h.gate.audit().events_for_session("tiktok").await.unwrap();
    let actions: Vec<_> = events.iter().map(|e| e.action.as_str()).collect();
    assert!(actions.ends_with(&["auth_reset", "incident_resolved"]));
    let reset = &events[events.len() - 2];
    assert_eq!(reset.actor, "ops-lead");
    assert_eq!(reset.reason, "auth lockout lifted");
    assert!(h.gate.audit().verify_all().await.unwrap().intact());
}

#[tokio::test]
async fn test_destination_policy_refusal_archives_and_raises_incident() {
    let h = harness()
        .publisher(
            ScriptedPublisher::new("tiktok")
                .then_err(PublishError::policy("prohibited product category")),
        )
        .build()
        .await;
    let id = h
        .gate
        .submit(brief("cozy desk setup"), vec![style_ref("r1")])
        .await
        .unwrap();

    let err = h.gate.drive(&id).await.unwrap_err();
    let GateError::PolicyRejection { reason, .. } = err else {
        panic!("expected policy rejection");
    };
    assert!(reason.contains("tiktok refused the package"));

    let status = h.gate.get_status(&id).await.unwrap();
    assert_eq!(status.state, UnitState::Archived);
    assert_eq!(h.gate.incidents().open_for(IncidentKind::PolicyViolation), 1);
    // refused content is not remembered as published
    assert_eq!(h.gate.resilience().index().published_count("tiktok"), 0);
}

#[tokio::test]
async fn test_destination_rate_limit_defers_publish() {
    let h = harness()
        .config(relaxed_config())
        .publisher(
            ScriptedPublisher::new("tiktok")
                .then_err(PublishError::rate_limit(Some(Duration::minutes(10)), "slow down")),
        )
        .build()
        .await;
    let id = h
        .gate
        .submit(brief("cozy desk setup"), vec![style_ref("r1")])
        .await
        .unwrap();

    let status = h.gate.drive(&id).await.unwrap();
    assert_eq!(status.state, UnitState::QualityChecked);
    assert_eq!(status.retry_after, Some(t0() + Duration::minutes(10)));

    let err = h.gate.advance(&id).await.unwrap_err();
    assert!(matches!(err, GateError::RateLimited { .. }));

    h.clock.advance(Duration::minutes(11));
    let status = h.gate.drive(&id).await.unwrap();
    assert_eq!(status.state, UnitState::Published);
    assert_eq!(status.retry_after, None);
}

#[tokio::test]
async fn test_local_spacing_queues_second_unit() {
    let h = harness().build().await;
    let a = h
        .gate
        .submit(brief("desk setup one"), vec![style_ref("r1")])
        .await
        .unwrap();
    let b = h
        .gate
        .submit(brief("desk setup two"), vec![style_ref("r1")])
        .await
        .unwrap();

    assert_eq!(h.gate.drive(&a).await.unwrap().state, UnitState::Published);
    let status = h.gate.drive(&b).await.unwrap();
    assert_eq!(status.state, UnitState::QualityChecked);
    assert_eq!(status.retry_after, Some(t0() + Duration::hours(1)));
    assert_eq!(h.publisher.calls(), 1);

    let history = h.ledger.history("tiktok").await.unwrap();
    assert_eq!(history.last().unwrap().outcome, PublishOutcome::RateLimited);
}

#[tokio::test]
async fn test_destination_without_publisher_is_a_config_error() {
    let h = harness().build().await;
    let mut b = brief("cozy desk setup");
    b.destination = "pinterest".to_string();
    let id = h.gate.submit(b, vec![style_ref("r1")]).await.unwrap();
    advance_to(&h.gate, &id, UnitState::QualityChecked).await;

    let err = h.gate.advance(&id).await.unwrap_err();
    assert!(matches!(err, GateError::InvalidConfig(_)));
    assert_eq!(
        h.gate.get_status(&id).await.unwrap().state,
        UnitState::QualityChecked
    );
}

#[tokio::test]
async fn test_status_lookup_requires_capability() {
    let h = harness().build().await;
    let err = h
        .gate
        .resilience()
        .fetch_status("tiktok", "tiktok-post-1")
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::InvalidConfig(_)));

    let h = harness()
        .publisher(
            ScriptedPublisher::new("tiktok")
                .with_capabilities(vec![Capability::Publish, Capability::FetchStatus]),
        )
        .build()
        .await;
    let status = h
        .gate
        .resilience()
        .fetch_status("tiktok", "tiktok-post-1")
        .await
        .unwrap();
    assert_eq!(status, RemoteStatus::Live);
}
