//! GitHub API client and effect interpreter.
//!
//! This module provides the implementation for executing host effects via the octocrab
//! library. It implements the `HostInterpreter` trait defined in the effects module.
//!
//! Key features:
//! - Installation tokens minted from the App key and cached until near expiry
//! - Exponential backoff retry for transient failures
//! - A shared gate that suspends requests while the rate limit is exhausted
//! - Distinguishes transient, rate-limited, not-found and permanent errors

mod client;
mod error;
mod gate;
mod interpreter;
mod retry;
mod token;

pub use client::{DEFAULT_API_BASE, OctocrabHost};
pub use error::{DEFAULT_RATE_LIMIT_WAIT, HostApiError, HostErrorKind};
pub use gate::RateLimitGate;
pub use retry::{
    Classify, Disposition, RetryConfig, RetryPolicy, RetryResult, retry_with_backoff,
    retry_with_gate,
};
pub use token::{
    AppTokenSource, DEFAULT_REFRESH_MARGIN_SECS, InstallationToken, TokenCache, TokenSource,
};
