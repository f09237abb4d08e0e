//! Client connection trait for upstream APIs.
//!
//! Provides a unified interface for turning credentials into a ready-to-use
//! client. Implementations perform whatever round trips their authentication
//! scheme needs before the first request is sent.

/// Trait for establishing an authenticated connection to an upstream API.
pub trait Client {
    /// Error type for connection operations.
    type Error;

    /// Acquires credentials and returns the connected client.
    ///
    /// Called once at the start of a run and again whenever the upstream
    /// rejects the current credentials.
    fn connect(self) -> impl std::future::Future<Output = Result<Self, Self::Error>> + Send
    where
        Self: Sized;
}
