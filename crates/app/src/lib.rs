//! Apiflow application layer.
//!
//! Loads flow definitions, executes their call trees against the upstream API
//! and writes the merged documents.

/// Application runner executing every discovered flow.
pub mod app;
/// Application and flow configuration.
pub mod config;
/// Flow execution lifecycle.
pub mod flow;
/// Recursive call-tree processing.
pub mod tree;
