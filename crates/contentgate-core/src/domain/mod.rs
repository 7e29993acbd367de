//! Domain model: references, decisions, packages, content units.

pub mod clock;
pub mod decision;
pub mod digest;
pub mod error;
pub mod package;
pub mod reference;
pub mod unit;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{Decision, GateKind, RewriteDirective, Verdict};
pub use error::{GateError, Result};
pub use package::{Asset, AssetKind, CaptionVariant, ContentPackage};
pub use reference::{LicenseProof, LicenseStatus, Reference, UsageContext, UsageTag};
pub use unit::{ContentBrief, ContentUnit, PendingRewrite, RewriteCounters, TerminalReason, UnitState};
