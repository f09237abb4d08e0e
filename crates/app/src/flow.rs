//! Flow execution lifecycle.
//!
//! A flow run authenticates once, processes the root call nodes, merges their
//! results into one document and serializes it. The run is all-or-nothing:
//! it either yields a document or fails with a single error.

use crate::config::{FlowSpec, DEFAULT_ELEMENT_CONCURRENCY, DEFAULT_MAX_DEPTH};
use crate::tree::TreeProcessor;
use apiflow_core::merge;
use apiflow_core::retry::RetryConfig;
use apiflow_http::auth::AuthenticatedClientBuilder;
use apiflow_http::client::SharedClient;
use apiflow_http::config::ClientOptions;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Errors that fail a whole flow run.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Authentication failed: {source}")]
    Auth {
        #[source]
        source: apiflow_http::auth::Error,
    },
    #[error("Flow produced no results")]
    NoResults,
    #[error("Flow run cancelled")]
    Cancelled,
    #[error("Failed to merge root results: {source}")]
    Merge {
        #[source]
        source: merge::Error,
    },
    #[error("Failed to serialize flow document: {source}")]
    SerdeJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("Missing required builder attribute: {}", _0)]
    MissingBuilderAttribute(String),
}

/// One executable flow.
#[derive(Debug)]
pub struct Flow {
    spec: Arc<FlowSpec>,
    options: Arc<ClientOptions>,
    retry: RetryConfig,
    max_depth: usize,
    element_concurrency: usize,
    cancel: CancellationToken,
}

impl Flow {
    /// Flow name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Runs the flow and returns the serialized document.
    #[tracing::instrument(skip(self), name = "flow", fields(flow = %self.spec.name))]
    pub async fn execute(&self) -> Result<String, Error> {
        info!(base_url = %self.spec.base_url, "Flow started");
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            document = self.process() => document,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(document) => info!(elapsed_ms, bytes = document.len(), "Flow completed"),
            Err(e) => warn!(elapsed_ms, error = %e, "Flow ended without a document"),
        }
        result
    }

    async fn process(&self) -> Result<String, Error> {
        let client = AuthenticatedClientBuilder::new()
            .protocol(self.spec.auth.clone().map(Arc::new))
            .options(Arc::clone(&self.options))
            .build()
            .map_err(|source| Error::Auth { source })?;
        let client = SharedClient::connect(client, self.retry.clone())
            .await
            .map_err(|source| Error::Auth { source })?;

        let processor = TreeProcessor::new(
            Arc::new(client),
            self.spec.base_url.clone(),
            self.spec.headers.clone(),
            self.spec.content_type,
            self.max_depth,
            self.element_concurrency,
            self.cancel.clone(),
        );
        let results = processor
            .process_nodes(&self.spec.call_nodes, None, 0)
            .await;

        // Results gathered while cancelling are incomplete.
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if results.is_empty() {
            return Err(Error::NoResults);
        }

        let mut document = merge::merge(Value::Object(Map::new()), results)
            .map_err(|source| Error::Merge { source })?;
        if let Some(tag) = self.spec.root_tag() {
            let mut wrapped = Map::new();
            wrapped.insert(tag.to_string(), document);
            document = Value::Object(wrapped);
        }

        serde_json::to_string(&document).map_err(|source| Error::SerdeJson { source })
    }
}

/// Builder for a [`Flow`].
#[derive(Debug, Default)]
pub struct FlowBuilder {
    spec: Option<Arc<FlowSpec>>,
    options: Option<Arc<ClientOptions>>,
    retry: Option<RetryConfig>,
    max_depth: Option<usize>,
    element_concurrency: Option<usize>,
    cancel: Option<CancellationToken>,
}

impl FlowBuilder {
    pub fn new() -> FlowBuilder {
        FlowBuilder {
            ..Default::default()
        }
    }

    pub fn spec(mut self, spec: Arc<FlowSpec>) -> Self {
        self.spec = Some(spec);
        self
    }

    pub fn options(mut self, options: Arc<ClientOptions>) -> Self {
        self.options = Some(options);
        self
    }

    /// App-level retry config, overridden by the flow's own.
    pub fn retry(mut self, retry: Option<RetryConfig>) -> Self {
        self.retry = retry;
        self
    }

    pub fn max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn element_concurrency(mut self, element_concurrency: Option<usize>) -> Self {
        self.element_concurrency = element_concurrency;
        self
    }

    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Result<Flow, Error> {
        let spec = self
            .spec
            .ok_or_else(|| Error::MissingBuilderAttribute("spec".to_string()))?;
        let retry = RetryConfig::merge(&self.retry, &spec.retry);
        Ok(Flow {
            spec,
            options: self.options.unwrap_or_default(),
            retry,
            max_depth: self.max_depth.unwrap_or(DEFAULT_MAX_DEPTH),
            element_concurrency: self
                .element_concurrency
                .unwrap_or(DEFAULT_ELEMENT_CONCURRENCY),
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}
