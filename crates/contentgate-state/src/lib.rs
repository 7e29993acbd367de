//! contentgate-state: persistence for the contentgate pipeline core
//!
//! The core never talks to a database directly. It sees three traits:
//!
//! - `AuditStore`: append-only, sequence-numbered audit events
//! - `UnitStore`: content unit snapshots, active and archived
//! - `PublishLedger`: every outbound publish attempt, used to rebuild the
//!   duplicate-hash index on start
//!
//! `fakes` holds in-memory implementations; `SurrealStore` implements all
//! three against SurrealDB (`mem://`, `surrealkv://` or a remote engine).

mod error;
pub mod fakes;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use storage_traits::{
    AuditRecord, AuditStore, ContentDigest, PublishLedger, PublishOutcome, PublishRecord,
    StorageResult, UnitSnapshot, UnitStore,
};
pub use surreal_store::{StoreConfig, SurrealStore};

/// Result type for contentgate-state setup operations
pub type Result<T> = std::result::Result<T, StateError>;
