//! Effect interpreter trait.
//!
//! The trait-based design enables:
//! - The octocrab-backed interpreter in [`crate::github`]
//! - Scripted mock interpreters in tests

use std::future::Future;
use std::sync::Arc;

use crate::github::HostApiError;

use super::host::{HostEffect, HostResponse, HostScope};

/// Interprets host effects against the GitHub API.
///
/// Errors are always [`HostApiError`] so callers can classify them for retry.
pub trait HostInterpreter: Send + Sync {
    /// Execute a single effect once. Retrying is the caller's business.
    fn interpret(
        &self,
        scope: &HostScope,
        effect: HostEffect,
    ) -> impl Future<Output = Result<HostResponse, HostApiError>> + Send;
}

impl<T: HostInterpreter> HostInterpreter for Arc<T> {
    fn interpret(
        &self,
        scope: &HostScope,
        effect: HostEffect,
    ) -> impl Future<Output = Result<HostResponse, HostApiError>> + Send {
        (**self).interpret(scope, effect)
    }
}
