//! SurrealDB schema migrations and initialization
//!
//! Defines the three contentgate tables with their indexes and write
//! permissions. Safe to run on every connection (idempotent).

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all contentgate tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing contentgate SurrealDB schema");

    init_audit_events_table(db).await?;
    init_content_units_table(db).await?;
    init_publish_attempts_table(db).await?;

    info!("contentgate schema initialization complete");
    Ok(())
}

/// Initialize `audit_events` table
///
/// Schema:
/// ```text
/// TABLE audit_events {
///   seq:            INT (unique, 1-indexed, gapless)
///   event_id:       STRING (unique)
///   actor, action:  STRING
///   input_hash:     STRING?
///   output_hash:    STRING?
///   decision:       STRING?
///   reason:         STRING
///   session_id:     STRING (indexed)
///   tags:           ARRAY<STRING>
///   timestamp:      STRING (RFC 3339, nanoseconds)
///   previous_hash:  STRING
///   event_hash:     STRING
/// }
/// ```
///
/// Rows are never updated or deleted.
async fn init_audit_events_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing audit_events table");

    let sql = r#"
        DEFINE TABLE audit_events AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX idx_audit_seq ON TABLE audit_events COLUMNS seq UNIQUE;
        DEFINE INDEX idx_audit_event_id ON TABLE audit_events COLUMNS event_id UNIQUE;
        DEFINE INDEX idx_audit_session ON TABLE audit_events COLUMNS session_id;
    "#;

    db.query(sql).await?;
    info!("✓ audit_events table initialized");
    Ok(())
}

/// Initialize `content_units` table
///
/// One row per unit, keyed by `unit_id`, overwritten on every save.
async fn init_content_units_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing content_units table");

    let sql = r#"
        DEFINE TABLE content_units AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX idx_unit_id ON TABLE content_units COLUMNS unit_id UNIQUE;
        DEFINE INDEX idx_unit_tenant ON TABLE content_units COLUMNS tenant_id;
    "#;

    db.query(sql).await?;
    info!("✓ content_units table initialized");
    Ok(())
}

/// Initialize `publish_attempts` table
///
/// Append-only; `(destination, content_hash)` is indexed for duplicate
/// lookups when the publish index is hydrated.
async fn init_publish_attempts_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing publish_attempts table");

    let sql = r#"
        DEFINE TABLE publish_attempts AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX idx_publish_ordinal ON TABLE publish_attempts COLUMNS ordinal UNIQUE;
        DEFINE INDEX idx_publish_destination ON TABLE publish_attempts COLUMNS destination;
        DEFINE INDEX idx_publish_dest_hash ON TABLE publish_attempts COLUMNS destination, content_hash;
    "#;

    db.query(sql).await?;
    info!("✓ publish_attempts table initialized");
    Ok(())
}
