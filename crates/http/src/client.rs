//! Client shared by every node of a flow run.
//!
//! Transport failures are retried with the configured linear backoff. A
//! 401/403 response swaps in a freshly authenticated client for subsequent
//! requests; the rejected request itself fails without being repeated.

use crate::auth::{self, AuthenticatedClient};
use crate::request::{self, Request, Response};
use apiflow_core::client::Client;
use apiflow_core::retry::RetryConfig;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Errors that can occur while dispatching through the shared client.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Request failed: {source}")]
    Request {
        #[source]
        source: request::Error,
    },
    #[error("Credentials rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("Re-authentication failed: {source}")]
    Reauthenticate {
        #[source]
        source: auth::Error,
    },
    #[error("Request cancelled")]
    Cancelled,
}

/// Authenticated client shared across concurrent node requests.
#[derive(Debug)]
pub struct SharedClient {
    current: RwLock<Arc<AuthenticatedClient>>,
    retry: RetryConfig,
}

impl SharedClient {
    /// Authenticates `client` and wraps it for shared use.
    pub async fn connect(client: AuthenticatedClient, retry: RetryConfig) -> Result<Self, auth::Error> {
        let client = client.connect().await?;
        Ok(SharedClient {
            current: RwLock::new(Arc::new(client)),
            retry,
        })
    }

    /// Returns the client currently in use.
    pub async fn current(&self) -> Arc<AuthenticatedClient> {
        Arc::clone(&*self.current.read().await)
    }

    /// Replaces `stale` with a freshly authenticated client.
    ///
    /// Does nothing when another request already replaced it.
    pub async fn reauthenticate(&self, stale: &Arc<AuthenticatedClient>) -> Result<(), auth::Error> {
        let mut current = self.current.write().await;
        if !Arc::ptr_eq(&current, stale) {
            return Ok(());
        }
        info!("Re-authenticating shared client");
        let fresh = AuthenticatedClient::clone(stale).connect().await?;
        *current = Arc::new(fresh);
        Ok(())
    }

    /// Sends `request`, retrying transport failures until the attempts run out or `cancel` fires.
    pub async fn send(&self, request: &Request, cancel: &CancellationToken) -> Result<Response, Error> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.send_authenticated(request) => result,
        }
    }

    async fn send_authenticated(&self, request: &Request) -> Result<Response, Error> {
        let (response, client) = self.send_with_retry(request).await?;
        if !response.is_auth_rejection() {
            return Ok(response);
        }

        let status = response.status.as_u16();
        warn!(url = %request.url, status, "Credentials rejected, re-authenticating");
        self.reauthenticate(&client)
            .await
            .map_err(|source| Error::Reauthenticate { source })?;

        Err(Error::Rejected {
            status,
            body: response.body,
        })
    }

    async fn send_with_retry(
        &self,
        request: &Request,
    ) -> Result<(Response, Arc<AuthenticatedClient>), Error> {
        tokio_retry::Retry::spawn(self.retry.strategy(), || async {
            let client = self.current().await;
            match request.send(&client).await {
                Ok(response) => Ok((response, client)),
                Err(e) if e.is_transient() => {
                    warn!(error = %e, url = %request.url, "Request failed, retrying");
                    Err(tokio_retry::RetryError::transient(Error::Request { source: e }))
                }
                Err(e) => Err(tokio_retry::RetryError::permanent(Error::Request { source: e })),
            }
        })
        .await
    }
}
