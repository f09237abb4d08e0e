//! Base trait for top level units of work.

/// Trait for executing a unit of work asynchronously until completion.
///
/// Implemented by the application runner so the binary can drive it without
/// knowing how flows are discovered or executed.
pub trait Runner {
    /// Error type for execution failures.
    type Error;

    /// Executes until completion or error.
    fn run(self) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send
    where
        Self: Sized;
}
