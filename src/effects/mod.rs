//! Effects-as-data for host API operations.
//!
//! This module defines effect types that describe operations without executing them.
//! This enables:
//! - Fetch and publish logic that is testable against a scripted interpreter
//! - Logging of intended operations by name
//! - One place that knows how each call maps onto the REST API

pub mod host;
pub mod interpreter;

pub use host::{
    Annotation, AnnotationLevel, AppIdentity, ChangedFile, CheckConclusion, CheckRunData,
    CheckRunOutput, FilePage, HostEffect, HostResponse, HostScope, InlineComment, NewReview,
    ReviewAction, ReviewData,
};
pub use interpreter::HostInterpreter;
