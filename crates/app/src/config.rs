//! Configuration structures for the application and individual flows.
//!
//! The application config is loaded by the binary through the `config` crate.
//! Flow files are plain YAML or JSON documents picked by extension.

use apiflow_core::content::ContentType;
use apiflow_core::retry::RetryConfig;
use apiflow_http::config::{AuthProtocol, ClientOptions, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use url::Url;

/// Supported flow file extensions.
pub const FLOW_CONFIG_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Default maximum nesting depth of call nodes.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Default number of array elements whose children run at the same time.
pub const DEFAULT_ELEMENT_CONCURRENCY: usize = 16;

/// Key the document is nested under when a flow sets no root tag.
pub const DEFAULT_ROOT_TAG: &str = "FlowRootEntity";

/// Errors that can occur while loading a flow file.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("IO operation failed on path {path}: {source}")]
    IO {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse YAML flow {path}: {source}")]
    SerdeYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Failed to parse JSON flow {path}: {source}")]
    SerdeJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unsupported flow file extension: {path}")]
    UnsupportedExtension { path: PathBuf },
}

/// Main application configuration.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct AppConfig {
    /// Flow discovery options.
    pub flows: FlowOptions,
    /// Optional output options, documents go to stdout when absent.
    pub output: Option<OutputOptions>,
    /// Optional app-level retry configuration (can be overridden per flow).
    pub retry: Option<RetryConfig>,
    /// Optional transport options.
    pub http: Option<ClientOptions>,
    /// Maximum nesting depth of call nodes (defaults to 32).
    pub max_depth: Option<usize>,
    /// Array elements processed at the same time (defaults to 16).
    pub element_concurrency: Option<usize>,
}

/// Flow discovery configuration.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct FlowOptions {
    /// Glob pattern matching flow files, e.g. "/flows/*.yaml".
    pub path: PathBuf,
}

/// Output configuration.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct OutputOptions {
    /// Directory receiving one `<flow name>.json` document per flow.
    pub dir: PathBuf,
}

/// Top-level configuration of a flow file.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct FlowConfig {
    pub flow: FlowSpec,
}

impl FlowConfig {
    /// Reads a flow file, choosing the format by extension.
    pub fn load(path: &Path) -> Result<FlowConfig, Error> {
        let contents = std::fs::read_to_string(path).map_err(|source| Error::IO {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&contents).map_err(|source| Error::SerdeYaml {
                    path: path.to_path_buf(),
                    source,
                })
            }
            Some("json") => serde_json::from_str(&contents).map_err(|source| Error::SerdeJson {
                path: path.to_path_buf(),
                source,
            }),
            _ => Err(Error::UnsupportedExtension {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Declarative description of one flow run.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSpec {
    /// Flow name, also the output document name.
    pub name: String,
    /// Base address node paths are resolved against.
    pub base_url: Url,
    /// Key the merged document is nested under, an empty tag disables nesting.
    pub root_tag: Option<String>,
    #[serde(default)]
    pub content_type: ContentType,
    /// Headers sent with every node request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Authentication protocol, anonymous when absent.
    pub auth: Option<AuthProtocol>,
    /// Flow-level retry override.
    pub retry: Option<RetryConfig>,
    pub call_nodes: Vec<CallNode>,
}

impl FlowSpec {
    /// Returns the root tag, [`DEFAULT_ROOT_TAG`] when unset and `None` when empty.
    pub fn root_tag(&self) -> Option<&str> {
        match self.root_tag.as_deref() {
            None => Some(DEFAULT_ROOT_TAG),
            Some("") => None,
            Some(tag) => Some(tag),
        }
    }
}

/// One node of the call tree.
#[derive(PartialEq, Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallNode {
    /// Key the node value is embedded under, spliced unnamed when absent.
    pub name: Option<String>,
    /// Path relative to the base address, no call is made when absent.
    pub path: Option<String>,
    #[serde(default)]
    pub method: Method,
    /// Placeholder token to ancestor field path.
    #[serde(default)]
    pub links: BTreeMap<String, String>,
    #[serde(default)]
    pub body: HashMap<String, String>,
    pub response_to_map: Option<String>,
    /// Literal used as the body when no call is made or the response is empty.
    pub null_substitute: Option<Value>,
    #[serde(default)]
    pub children: Vec<CallNode>,
}

impl CallNode {
    /// Display label for logs.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.path.as_deref())
            .unwrap_or("<anonymous>")
    }
}
