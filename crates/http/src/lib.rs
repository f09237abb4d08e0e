//! Authenticated HTTP transport for apiflow.
//!
//! Turns a flow's authentication protocol into request credentials, dispatches
//! node requests with request/response logging, and wraps every dispatch in the
//! retry and reauthentication policy shared by a whole run.

/// Credential acquisition for the supported authentication protocols.
pub mod auth;
/// Shared, swappable client with retry and reauthentication.
pub mod client;
/// Authentication protocol and transport configuration.
pub mod config;
/// Outbound request description and dispatch.
pub mod request;
