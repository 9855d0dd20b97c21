//! Delivery deduplication.
//!
//! GitHub redelivers webhooks on timeouts and operators replay them by hand.
//! Each delivery ID is checked against a [`DedupeWindow`] before any work is
//! queued, so a replay within the retention window is acknowledged without a
//! second review.

pub mod window;

pub use window::{DEFAULT_CAPACITY, DEFAULT_RETENTION_HOURS, DedupeWindow};

use crate::types::DeliveryId;

/// The set of recently accepted delivery IDs.
pub type DeliveryDeduplicator = DedupeWindow<DeliveryId>;
