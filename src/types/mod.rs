//! Core domain types for the review bot.
//!
//! This module contains the fundamental types used throughout the application,
//! designed to encode invariants via the type system.

pub mod diff;
pub mod event;
pub mod finding;
pub mod ids;

pub use diff::{AddedLine, FileDiff, FileStatus, Hunk};
pub use event::{EventKey, ReviewEvent, ReviewTarget, TargetKey};
pub use finding::{Finding, ReviewResult, Severity, StageFailure, StageKind, Verdict};
pub use ids::{DeliveryId, InstallationId, InvalidSha, PrNumber, RepoId, Sha};
