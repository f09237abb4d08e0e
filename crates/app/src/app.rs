use crate::config::{AppConfig, FlowConfig, FLOW_CONFIG_EXTENSIONS};
use crate::flow::FlowBuilder;
use futures_util::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Errors that can occur during application execution.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("IO operation failed on path {path}: {source}")]
    IO {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write flow document to stdout: {source}")]
    Stdout {
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to glob flow configuration files: {source}")]
    Glob {
        #[source]
        source: glob::GlobError,
    },
    #[error("Invalid glob pattern: {source}")]
    Pattern {
        #[source]
        source: glob::PatternError,
    },
    #[error("Invalid path")]
    InvalidPath,
    #[error(transparent)]
    Flow(#[from] crate::flow::Error),
    #[error(transparent)]
    FlowConfig(#[from] crate::config::Error),
    #[error("{failed} of {total} flows failed")]
    FlowsFailed { failed: usize, total: usize },
}

/// Main application that loads and runs flows concurrently.
pub struct App {
    /// Global application configuration.
    pub config: AppConfig,
    /// Run-wide cancellation signal.
    pub cancel: CancellationToken,
}

impl apiflow_core::runner::Runner for App {
    type Error = Error;

    /// Discovers flow files, runs every flow concurrently and writes the documents.
    #[tracing::instrument(skip(self), name = "app")]
    async fn run(self) -> Result<(), Error> {
        let app_config = Arc::new(self.config);

        let glob_pattern = app_config
            .flows
            .path
            .to_str()
            .ok_or(Error::InvalidPath)?;

        let flow_paths = glob::glob(glob_pattern)
            .map_err(|source| Error::Pattern { source })?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| Error::Glob { source })?;

        let flow_configs: Vec<FlowConfig> = flow_paths
            .iter()
            .filter(|path| {
                let supported = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| FLOW_CONFIG_EXTENSIONS.contains(&ext));
                if !supported {
                    warn!(path = ?path, "Skipping file with unsupported extension");
                }
                supported
            })
            .map(|path| {
                info!(path = ?path, "Loading flow");
                FlowConfig::load(path)
            })
            .collect::<Result<Vec<_>, _>>()?;

        if flow_configs.is_empty() {
            warn!(pattern = glob_pattern, "No flows found");
            return Ok(());
        }

        let options = Arc::new(app_config.http.clone().unwrap_or_default());
        let total = flow_configs.len();
        let runs = flow_configs.into_iter().map(|config| {
            let app_config = Arc::clone(&app_config);
            let options = Arc::clone(&options);
            let cancel = self.cancel.clone();
            async move {
                let name = config.flow.name.clone();
                let result = run_flow(config, &app_config, options, cancel).await;
                if let Err(e) = &result {
                    error!(flow = %name, error = %e, "Flow failed");
                }
                result
            }
        });

        let failed = join_all(runs)
            .await
            .into_iter()
            .filter(Result::is_err)
            .count();
        if failed > 0 {
            return Err(Error::FlowsFailed { failed, total });
        }
        Ok(())
    }
}

/// Executes one flow and writes its document.
async fn run_flow(
    config: FlowConfig,
    app_config: &AppConfig,
    options: Arc<apiflow_http::config::ClientOptions>,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let flow = FlowBuilder::new()
        .spec(Arc::new(config.flow))
        .options(options)
        .retry(app_config.retry.clone())
        .max_depth(app_config.max_depth)
        .element_concurrency(app_config.element_concurrency)
        .cancel(cancel)
        .build()?;
    let document = flow.execute().await?;

    match &app_config.output {
        Some(output) => {
            tokio::fs::create_dir_all(&output.dir)
                .await
                .map_err(|source| Error::IO {
                    path: output.dir.clone(),
                    source,
                })?;
            let path = output.dir.join(format!("{}.json", flow.name()));
            tokio::fs::write(&path, document)
                .await
                .map_err(|source| Error::IO {
                    path: path.clone(),
                    source,
                })?;
            info!(flow = flow.name(), path = ?path, "Flow document written");
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(format!("{document}\n").as_bytes())
                .await
                .map_err(|source| Error::Stdout { source })?;
            stdout
                .flush()
                .await
                .map_err(|source| Error::Stdout { source })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FlowOptions, OutputOptions};
    use apiflow_core::retry::RetryConfig;
    use apiflow_core::runner::Runner;
    use httpmock::prelude::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn app_config(flows: PathBuf, output: PathBuf) -> AppConfig {
        AppConfig {
            flows: FlowOptions { path: flows },
            output: Some(OutputOptions { dir: output }),
            retry: Some(RetryConfig {
                max_attempts: 0,
                backoff: Duration::from_millis(1),
            }),
            http: None,
            max_depth: None,
            element_concurrency: None,
        }
    }

    #[tokio::test]
    async fn test_runs_flows_and_writes_documents() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/status");
                then.status(200).body(r#"{"up":true}"#);
            })
            .await;

        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let flows = dir.join("flows");
        std::fs::create_dir_all(&flows).unwrap();
        std::fs::write(
            flows.join("status.yaml"),
            format!(
                "flow:\n  name: status\n  baseUrl: {}\n  callNodes:\n    - name: status\n      path: /status\n",
                server.base_url()
            ),
        )
        .unwrap();
        std::fs::write(
            flows.join("constant.json"),
            r#"{"flow": {"name": "constant", "baseUrl": "http://localhost", "callNodes": [{"name": "answer", "nullSubstitute": "{\"value\": 42}"}]}}"#,
        )
        .unwrap();

        let output = dir.join("out");
        let app = App {
            config: app_config(flows.join("*"), output.clone()),
            cancel: CancellationToken::new(),
        };
        app.run().await.unwrap();

        assert_eq!(
            std::fs::read_to_string(output.join("status.json")).unwrap(),
            r#"{"FlowRootEntity":{"status":{"up":true}}}"#
        );
        assert_eq!(
            std::fs::read_to_string(output.join("constant.json")).unwrap(),
            r#"{"FlowRootEntity":{"answer":{"value":42}}}"#
        );
    }

    #[tokio::test]
    async fn test_failed_flow_does_not_stop_others() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing");
                then.status(404);
            })
            .await;

        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let flows = dir.join("flows");
        std::fs::create_dir_all(&flows).unwrap();
        std::fs::write(
            flows.join("empty.yaml"),
            format!(
                "flow:\n  name: empty\n  baseUrl: {}\n  callNodes:\n    - path: /missing\n",
                server.base_url()
            ),
        )
        .unwrap();
        std::fs::write(
            flows.join("ok.yaml"),
            "flow:\n  name: ok\n  baseUrl: http://localhost\n  callNodes:\n    - name: ok\n      nullSubstitute: '[1]'\n",
        )
        .unwrap();

        let output = dir.join("out");
        let app = App {
            config: app_config(flows.join("*.yaml"), output.clone()),
            cancel: CancellationToken::new(),
        };
        let err = app.run().await.unwrap_err();

        assert!(matches!(err, Error::FlowsFailed { failed: 1, total: 2 }));
        assert!(!output.join("empty.json").exists());
        assert_eq!(
            std::fs::read_to_string(output.join("ok.json")).unwrap(),
            r#"{"FlowRootEntity":{"ok":[1]}}"#
        );
    }

    #[tokio::test]
    async fn test_no_flows_found() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let app = App {
            config: app_config(dir.join("*.yaml"), dir.join("out")),
            cancel: CancellationToken::new(),
        };
        assert!(app.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_flow_file() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        std::fs::write(dir.join("broken.yaml"), "flow: [not, a, flow]").unwrap();
        let app = App {
            config: app_config(dir.join("*.yaml"), dir.join("out")),
            cancel: CancellationToken::new(),
        };
        let err = app.run().await.unwrap_err();
        assert!(matches!(err, Error::FlowConfig(_)));
    }
}
