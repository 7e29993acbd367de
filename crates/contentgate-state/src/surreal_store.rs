//! SurrealDB-backed implementation of all three storage traits
//!
//! Uses the row types in `schema` for persistence, converting to/from
//! `storage_traits` types at the boundary.

use async_trait::async_trait;
use serde::Deserialize;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::schema::{AuditEventRow, PublishAttemptRow, UnitRow};
use crate::storage_traits::{
    AuditRecord, AuditStore, ContentDigest, PublishLedger, PublishOutcome, PublishRecord,
    StorageResult, UnitSnapshot, UnitStore,
};

const DEFAULT_NAMESPACE: &str = "contentgate";
const DEFAULT_DATABASE: &str = "main";
const DEFAULT_LOCAL_PATH: &str = ".contentgate/db";

/// Connection settings for [`SurrealStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Engine URL: `mem://`, `surrealkv://path`, `ws://host:port`, `wss://...`
    pub url: String,
    pub namespace: String,
    pub database: String,
    /// Root credentials, used for remote engines only
    pub credentials: Option<(String, String)>,
}

impl StoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            credentials: None,
        }
    }

    /// Read `CONTENTGATE_DB_URL`, `CONTENTGATE_DB_NS`, `CONTENTGATE_DB_NAME`,
    /// `CONTENTGATE_DB_USER` and `CONTENTGATE_DB_PASS`.
    ///
    /// Without a URL, falls back to local persistence under `.contentgate/db`.
    pub fn from_env() -> Self {
        let url = std::env::var("CONTENTGATE_DB_URL")
            .unwrap_or_else(|_| format!("surrealkv://{DEFAULT_LOCAL_PATH}"));
        let mut config = Self::new(url);
        if let Ok(ns) = std::env::var("CONTENTGATE_DB_NS") {
            config.namespace = ns;
        }
        if let Ok(db) = std::env::var("CONTENTGATE_DB_NAME") {
            config.database = db;
        }
        if let (Ok(user), Ok(pass)) = (
            std::env::var("CONTENTGATE_DB_USER"),
            std::env::var("CONTENTGATE_DB_PASS"),
        ) {
            config.credentials = Some((user, pass));
        }
        config
    }
}

#[derive(Debug, Deserialize)]
struct CountRow {
    n: u64,
}

/// SurrealDB-backed implementation of [`AuditStore`], [`UnitStore`] and
/// [`PublishLedger`].
pub struct SurrealStore {
    db: Surreal<Any>,
}

impl SurrealStore {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `contentgate/main`, and runs `init_schema`.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect(&StoreConfig::new("mem://")).await
    }

    /// Create from environment variables (see [`StoreConfig::from_env`]).
    pub async fn from_env() -> crate::Result<Self> {
        Self::connect(&StoreConfig::from_env()).await
    }

    pub async fn connect(config: &StoreConfig) -> crate::Result<Self> {
        if let Some(path) = config.url.strip_prefix("surrealkv://") {
            std::fs::create_dir_all(path).map_err(|e| {
                StateError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    path, e
                ))
            })?;
        }

        let db = surrealdb::engine::any::connect(config.url.as_str())
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to connect to {}: {}", config.url, e))
            })?;

        if let Some((username, password)) = &config.credentials {
            db.signin(Root { username, password })
                .await
                .map_err(|e| StateError::Connection(format!("Root auth failed: {e}")))?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;

        info!(url = %config.url, "SurrealStore connected");
        Ok(Self { db })
    }

    // -- private helpers -----------------------------------------------------

    async fn audit_rows(
        &self,
        sql: &'static str,
        bindings: Vec<(&'static str, serde_json::Value)>,
    ) -> StorageResult<Vec<AuditRecord>> {
        let mut query = self.db.query(sql);
        for binding in bindings {
            query = query.bind(binding);
        }
        let mut res = query.await.map_err(backend)?;
        let rows: Vec<AuditEventRow> = res.take(0).map_err(backend)?;
        rows.into_iter().map(AuditEventRow::into_record).collect()
    }

    async fn count(&self, sql: &'static str) -> StorageResult<u64> {
        let mut res = self.db.query(sql).await.map_err(backend)?;
        let rows: Vec<CountRow> = res.take(0).map_err(backend)?;
        Ok(rows.first().map(|r| r.n).unwrap_or(0))
    }
}

fn backend(e: surrealdb::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

#[async_trait]
impl AuditStore for SurrealStore {
    async fn append(&self, record: AuditRecord) -> StorageResult<()> {
        let expected = self
            .head()
            .await?
            .map(|h| h.seq + 1)
            .unwrap_or(1);
        if record.seq != expected {
            return Err(StorageError::SequenceConflict {
                expected,
                actual: record.seq,
            });
        }

        debug!(seq = record.seq, action = %record.action, "appending audit event");

        let _created: Option<AuditEventRow> = self
            .db
            .create("audit_events")
            .content(AuditEventRow::from(record))
            .await
            .map_err(backend)?;

        Ok(())
    }

    async fn head(&self) -> StorageResult<Option<AuditRecord>> {
        let rows = self
            .audit_rows(
                "SELECT * FROM audit_events ORDER BY seq DESC LIMIT 1",
                Vec::new(),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn range(&self, from: u64, to: u64) -> StorageResult<Vec<AuditRecord>> {
        self.audit_rows(
            "SELECT * FROM audit_events WHERE seq >= $from AND seq <= $to ORDER BY seq ASC",
            vec![("from", from.into()), ("to", to.into())],
        )
        .await
    }

    async fn by_session(&self, session_id: &str) -> StorageResult<Vec<AuditRecord>> {
        self.audit_rows(
            "SELECT * FROM audit_events WHERE session_id = $sid ORDER BY seq ASC",
            vec![("sid", session_id.into())],
        )
        .await
    }
}

#[async_trait]
impl UnitStore for SurrealStore {
    async fn save(&self, snapshot: UnitSnapshot) -> StorageResult<()> {
        let row = UnitRow::from_snapshot(snapshot)?;
        let uid = row.unit_id.clone();

        debug!(unit_id = %uid, state = %row.state, "saving unit snapshot");

        self.db
            .query("UPSERT type::thing('content_units', $uid) CONTENT $row")
            .bind(("uid", uid))
            .bind(("row", row))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;

        Ok(())
    }

    async fn load(&self, unit_id: &str) -> StorageResult<UnitSnapshot> {
        let mut res = self
            .db
            .query("SELECT * FROM content_units WHERE unit_id = $uid")
            .bind(("uid", unit_id.to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<UnitRow> = res.take(0).map_err(backend)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::NotFound {
                kind: "unit",
                key: unit_id.to_string(),
            })?
            .into_snapshot()
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> StorageResult<Vec<UnitSnapshot>> {
        let mut res = self
            .db
            .query("SELECT * FROM content_units WHERE tenant_id = $tid ORDER BY updated_at ASC")
            .bind(("tid", tenant_id.to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<UnitRow> = res.take(0).map_err(backend)?;
        rows.into_iter().map(UnitRow::into_snapshot).collect()
    }
}

#[async_trait]
impl PublishLedger for SurrealStore {
    async fn record(&self, record: PublishRecord) -> StorageResult<()> {
        let ordinal = self
            .count("SELECT count() AS n FROM publish_attempts GROUP ALL")
            .await?;

        debug!(
            destination = %record.destination,
            outcome = %record.outcome,
            "recording publish attempt"
        );

        let _created: Option<PublishAttemptRow> = self
            .db
            .create("publish_attempts")
            .content(PublishAttemptRow::new(ordinal, record))
            .await
            .map_err(backend)?;

        Ok(())
    }

    async fn history(&self, destination: &str) -> StorageResult<Vec<PublishRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM publish_attempts WHERE destination = $dest ORDER BY ordinal ASC")
            .bind(("dest", destination.to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<PublishAttemptRow> = res.take(0).map_err(backend)?;
        rows.into_iter().map(PublishAttemptRow::into_record).collect()
    }

    async fn published_hashes(&self) -> StorageResult<Vec<(String, ContentDigest)>> {
        let mut res = self
            .db
            .query("SELECT * FROM publish_attempts WHERE outcome = $outcome ORDER BY ordinal ASC")
            .bind(("outcome", PublishOutcome::Published.to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<PublishAttemptRow> = res.take(0).map_err(backend)?;
        rows.into_iter()
            .map(|row| {
                let record = row.into_record()?;
                Ok((record.destination, record.content_hash))
            })
            .collect()
    }
}
