//! Webhook handling for GitHub events.
//!
//! This module provides:
//! - Signature verification for webhook payloads (HMAC-SHA256)
//! - Decoding of verified payloads into typed events

pub mod events;
pub mod parser;
pub mod signature;

pub use events::{PrAction, PullRequestEvent, PushCommit, PushEvent, WebhookEvent};
pub use parser::{DecodeError, decode_event};
pub use signature::{
    SignatureVerifier, Unauthorized, compute_signature, format_signature_header,
    parse_signature_header, verify_signature,
};
