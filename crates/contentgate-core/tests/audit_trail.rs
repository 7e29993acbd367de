//! Hash-chained audit log: append, verify, halt, export.

mod common;

use std::sync::Arc;

use chrono::Duration;
use common::t0;
use contentgate_core::audit::BreakKind;
use contentgate_core::{
    read_audit_export, write_audit_export, AuditEventId, AuditExport, AuditTrail, GateError,
    ManualClock, NewAuditEvent,
};
use contentgate_state::fakes::MemoryAuditStore;
use contentgate_state::ContentDigest;

struct Fixture {
    trail: AuditTrail,
    store: Arc<MemoryAuditStore>,
    clock: Arc<ManualClock>,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryAuditStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let trail = AuditTrail::new(store.clone(), clock.clone(), Duration::seconds(2));
    Fixture {
        trail,
        store,
        clock,
    }
}

async fn append_n(f: &Fixture, n: usize) {
    for i in 0..n {
        f.trail
            .append(
                NewAuditEvent::new("orchestrator", "transition", format!("unit-{}", i % 2))
                    .decision("APPROVE")
                    .reason(format!("step {i}"))
                    .tag("intake->reference_mapped"),
            )
            .await
            .unwrap();
        f.clock.advance(Duration::seconds(1));
    }
}

#[tokio::test]
async fn test_appends_are_sequenced_and_linked() {
    let f = fixture();
    append_n(&f, 3).await;

    assert_eq!(f.trail.head().await.unwrap(), Some(AuditEventId(3)));
    let records = f.trail.read(AuditEventId(1), AuditEventId(3)).await.unwrap();
    assert_eq!(records[0].previous_hash, ContentDigest::genesis());
    assert_eq!(records[1].previous_hash, records[0].event_hash);
    assert_eq!(records[2].previous_hash, records[1].event_hash);

    let report = f.trail.verify_all().await.unwrap();
    assert!(report.intact());
    assert_eq!(report.verified, 3);

    let unit0 = f.trail.events_for_session("unit-0").await.unwrap();
    assert_eq!(unit0.len(), 2);
}

#[tokio::test]
async fn test_empty_trail_verifies() {
    let f = fixture();
    assert!(f.trail.verify_all().await.unwrap().intact());
    f.trail.ensure_intact().await.unwrap();
}

#[tokio::test]
async fn test_segment_verification_uses_predecessor() {
    let f = fixture();
    append_n(&f, 5).await;
    assert!(f
        .trail
        .verify_chain(AuditEventId(3), AuditEventId(5))
        .await
        .unwrap());

    f.store.tamper(2, |r| r.actor = "someone-else".to_string());
    // segment 3..=5 links to the stored hash of 2, which is unchanged
    assert!(f
        .trail
        .verify_chain(AuditEventId(3), AuditEventId(5))
        .await
        .unwrap());
    assert!(!f
        .trail
        .verify_chain(AuditEventId(1), AuditEventId(5))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_inverted_range_fails_closed() {
    let f = fixture();
    append_n(&f, 5).await;
    let err = f
        .trail
        .verify_chain(AuditEventId(5), AuditEventId(2))
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::InvalidRange { from: 5, to: 2 }));
}

#[tokio::test]
async fn test_small_regressions_cannot_drift_the_clock_back() {
    let f = fixture();
    append_n(&f, 1).await;
    // each append lands 1.9s before the previous one
    for _ in 0..3 {
        f.clock.advance(Duration::milliseconds(-2_900));
        append_n(&f, 1).await;
    }
    let b = f.trail.verify_all().await.unwrap().first_break.unwrap();
    assert_eq!((b.seq, b.kind), (3, BreakKind::TimestampRegression));
}

#[tokio::test]
async fn test_edit_removal_and_relink_are_detected() {
    let f = fixture();
    append_n(&f, 4).await;
    f.store.tamper(3, |r| r.decision = Some("REJECT".to_string()));
    let b = f.trail.verify_all().await.unwrap().first_break.unwrap();
    assert_eq!((b.seq, b.kind), (3, BreakKind::HashMismatch));

    let f = fixture();
    append_n(&f, 4).await;
    f.store.tamper_remove(2).unwrap();
    let b = f.trail.verify_all().await.unwrap().first_break.unwrap();
    assert_eq!((b.seq, b.kind), (2, BreakKind::SequenceGap));

    // a record re-hashed after editing still breaks its successor's link
    let f = fixture();
    append_n(&f, 4).await;
    f.store.tamper(2, |r| {
        r.reason = "rewritten".to_string();
        r.event_hash = contentgate_core::audit::event_hash(r).unwrap();
    });
    let b = f.trail.verify_all().await.unwrap().first_break.unwrap();
    assert_eq!((b.seq, b.kind), (3, BreakKind::BrokenLink));
}

#[tokio::test]
async fn test_clock_regression_beyond_tolerance_is_a_break() {
    let f = fixture();
    append_n(&f, 2).await;

    // within tolerance
    f.clock.advance(Duration::seconds(-2));
    append_n(&f, 1).await;
    assert!(f.trail.verify_all().await.unwrap().intact());

    f.clock.advance(Duration::seconds(-30));
    append_n(&f, 1).await;
    let b = f.trail.verify_all().await.unwrap().first_break.unwrap();
    assert_eq!((b.seq, b.kind), (4, BreakKind::TimestampRegression));
}

#[tokio::test]
async fn test_ensure_intact_halts_on_break() {
    let f = fixture();
    append_n(&f, 3).await;
    f.trail.ensure_intact().await.unwrap();
    assert!(!f.trail.is_halted());

    f.store.tamper(1, |r| r.tags.clear());
    // records already verified are not re-checked incrementally
    append_n(&f, 1).await;
    f.trail.ensure_intact().await.unwrap();

    append_n(&f, 1).await;
    f.store.tamper(5, |r| r.tags.clear());
    let err = f.trail.ensure_intact().await.unwrap_err();
    assert!(matches!(err, GateError::ChainIntegrityFailure { at: 5, .. }));
    assert!(f.trail.is_halted());
    assert!(f.trail.halt_reason().unwrap().contains("seq 5"));

    let err = f.trail.ensure_intact().await.unwrap_err();
    assert!(matches!(err, GateError::Halted(_)));
}

#[tokio::test]
async fn test_append_resumes_from_stored_head() {
    let f = fixture();
    append_n(&f, 2).await;

    let reopened = AuditTrail::new(f.store.clone(), f.clock.clone(), Duration::seconds(2));
    let id = reopened
        .append(NewAuditEvent::new("operator", "submit", "unit-9"))
        .await
        .unwrap();
    assert_eq!(id, AuditEventId(3));
    assert!(reopened.verify_all().await.unwrap().intact());
}

#[tokio::test]
async fn test_export_round_trips_and_reverifies() {
    let f = fixture();
    append_n(&f, 4).await;
    let dir = tempfile::tempdir().unwrap();

    let export = AuditExport::capture(&f.trail).await.unwrap();
    assert_eq!(export.events.len(), 4);
    assert!(export.report.intact());
    write_audit_export(&export, dir.path()).unwrap();

    let loaded = read_audit_export(dir.path()).unwrap();
    assert_eq!(loaded, export);
    assert!(loaded.reverify(Duration::seconds(2)).unwrap().intact());
}

#[tokio::test]
async fn test_export_file_edit_is_rejected() {
    let f = fixture();
    append_n(&f, 2).await;
    let dir = tempfile::tempdir().unwrap();
    let export = AuditExport::capture(&f.trail).await.unwrap();
    let path = write_audit_export(&export, dir.path()).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, text.replace("step 1", "step 9")).unwrap();

    let err = read_audit_export(dir.path()).unwrap_err();
    assert!(matches!(err, GateError::DigestMismatch { .. }));
}

#[tokio::test]
async fn test_verification_is_repeatable_and_hashes_reproduce() {
    let f = fixture();
    append_n(&f, 3).await;

    let first = f.trail.verify_all().await.unwrap();
    let second = f.trail.verify_all().await.unwrap();
    assert_eq!(first, second);

    for record in f.trail.read(AuditEventId(1), AuditEventId(3)).await.unwrap() {
        assert_eq!(
            contentgate_core::audit::event_hash(&record).unwrap(),
            record.event_hash
        );
    }
}

#[tokio::test]
async fn test_any_field_edit_breaks_verification() {
    let edits: Vec<fn(&mut contentgate_state::AuditRecord)> = vec![
        |r| r.actor = "x".to_string(),
        |r| r.action = "x".to_string(),
        |r| r.reason = "x".to_string(),
        |r| r.session_id = "x".to_string(),
        |r| r.decision = None,
        |r| r.tags.push("x".to_string()),
        |r| r.timestamp += Duration::milliseconds(1),
    ];
    for edit in edits {
        let f = fixture();
        append_n(&f, 2).await;
        f.store.tamper(2, edit);
        assert!(!f
            .trail
            .verify_chain(AuditEventId(1), AuditEventId(2))
            .await
            .unwrap());
    }
}
