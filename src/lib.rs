//! Neural Review - A GitHub App that reviews pull requests and pushes.
//!
//! Webhook deliveries are verified, decoded and deduplicated at the HTTP
//! boundary, then queued. Workers fetch the changed files, run the staged
//! analysis pipeline (security, quality, pattern) and publish the result as a
//! pull request review or a check run.

pub mod analysis;
pub mod config;
pub mod dedupe;
pub mod effects;
pub mod fetch;
pub mod github;
pub mod lock;
pub mod orchestrator;
pub mod publish;
pub mod server;
pub mod types;
pub mod webhooks;

#[cfg(test)]
mod test_utils;
