//! Apiflow core library providing the building blocks of call-tree execution.
//!
//! This crate contains the transport-agnostic pieces shared by the HTTP and
//! application crates: structural merging of result documents, content parsing
//! and projection, link (placeholder) resolution and retry policy.

/// Client connection trait for authenticated upstream clients.
pub mod client;
/// Response body parsing, XML mapping and response-to-map projection.
pub mod content;
/// Placeholder substitution between a parent value and a child request.
pub mod link;
/// Structural merge of result documents.
pub mod merge;
/// Retry configuration with linear backoff.
pub mod retry;
/// Base runner trait for long running units of work.
pub mod runner;
