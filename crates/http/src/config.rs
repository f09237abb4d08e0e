//! Authentication protocol and transport configuration.
//!
//! A flow carries at most one authentication protocol. Each protocol is a
//! closed set of workflows; the workflow decides whether credentials are
//! attached directly or exchanged for a bearer token first.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default request timeout (2 minutes).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default maximum body size written to debug logs.
pub const DEFAULT_LOG_BODY_LIMIT: usize = 10_000;

/// Header carrying a static API key.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// HTTP method of a node request.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    #[serde(alias = "GET", alias = "Get")]
    Get,
    #[serde(alias = "POST", alias = "Post")]
    Post,
    #[serde(alias = "PUT", alias = "Put")]
    Put,
    #[serde(alias = "PATCH", alias = "Patch")]
    Patch,
    #[serde(alias = "DELETE", alias = "Delete")]
    Delete,
}

impl Method {
    /// Returns the method as a static string for logging.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Whether requests with this method carry a JSON body.
    pub const fn has_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Workflow of the Basic and API key protocols.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BasicWorkflow {
    /// Credentials are attached to every request directly.
    #[default]
    #[serde(alias = "Basic")]
    Basic,
    /// Credentials are exchanged for a bearer token.
    #[serde(alias = "Token")]
    Token,
}

/// Workflow of the OAuth2 protocol.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuth2Workflow {
    #[default]
    #[serde(alias = "ClientCredentials")]
    ClientCredentials,
    #[serde(alias = "AuthorizationCode")]
    AuthorizationCode,
    #[serde(alias = "Password")]
    Password,
    /// Not supported; authentication fails fast.
    #[serde(alias = "ResourceOwnerPasswordCredentials")]
    ResourceOwnerPasswordCredentials,
}

impl OAuth2Workflow {
    /// Grant type sent in the credential payload, if the workflow is supported.
    pub const fn grant_type(&self) -> Option<&'static str> {
        match self {
            OAuth2Workflow::ClientCredentials => Some("client_credentials"),
            OAuth2Workflow::AuthorizationCode => Some("authorization_code"),
            OAuth2Workflow::Password => Some("password"),
            OAuth2Workflow::ResourceOwnerPasswordCredentials => None,
        }
    }
}

/// Authentication protocol of a flow.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum AuthProtocol {
    /// Username and password, sent directly or exchanged for a token.
    #[serde(rename = "basic")]
    Basic(BasicProtocol),
    /// OAuth2 token exchange.
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2Protocol),
    /// Static API key, optionally exchanged for an additional token.
    #[serde(rename = "api_key")]
    ApiKey(ApiKeyProtocol),
}

impl AuthProtocol {
    /// Returns the protocol name for logging.
    pub const fn as_str(&self) -> &'static str {
        match self {
            AuthProtocol::Basic(_) => "basic",
            AuthProtocol::OAuth2(_) => "oauth2",
            AuthProtocol::ApiKey(_) => "api_key",
        }
    }
}

/// Basic protocol parameters.
#[derive(PartialEq, Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicProtocol {
    #[serde(default)]
    pub workflow: BasicWorkflow,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Token endpoint, required by the token workflow.
    pub url: Option<String>,
    /// Headers sent with token exchange requests only.
    pub headers: Option<HashMap<String, String>>,
}

/// OAuth2 protocol parameters.
#[derive(PartialEq, Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2Protocol {
    #[serde(default)]
    pub workflow: OAuth2Workflow,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Token endpoint.
    pub url: String,
    /// Headers sent with token exchange requests only.
    pub headers: Option<HashMap<String, String>>,
}

/// API key protocol parameters.
#[derive(PartialEq, Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyProtocol {
    #[serde(default)]
    pub workflow: BasicWorkflow,
    pub api_key: String,
    /// Token endpoint, required by the token workflow.
    pub url: Option<String>,
    /// Headers sent with token exchange requests only.
    pub headers: Option<HashMap<String, String>>,
}

/// Username and password pair.
#[derive(PartialEq, Eq, Clone, Debug, Default, Deserialize, Serialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Credentials attached to every node request.
#[derive(PartialEq, Eq, Clone, Debug, Default, Deserialize, Serialize)]
pub struct Credentials {
    pub bearer_auth: Option<String>,
    pub basic_auth: Option<BasicAuth>,
    pub api_key: Option<String>,
}

impl Credentials {
    /// Attaches the credentials to a request.
    pub fn apply(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(api_key) = &self.api_key {
            request = request.header(API_KEY_HEADER, api_key);
        }
        if let Some(basic_auth) = &self.basic_auth {
            request = request.basic_auth(&basic_auth.username, Some(&basic_auth.password));
        }
        if let Some(bearer_token) = &self.bearer_auth {
            request = request.bearer_auth(bearer_token);
        }
        request
    }
}

/// Transport options shared by every client of a run.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct ClientOptions {
    /// Request timeout (default: "2m").
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Maximum body size written to debug logs (default: 10000).
    #[serde(default = "default_log_body_limit")]
    pub log_body_limit: usize,
    /// Accept invalid TLS certificates (default: false).
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            log_body_limit: DEFAULT_LOG_BODY_LIMIT,
            accept_invalid_certs: false,
        }
    }
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_log_body_limit() -> usize {
    DEFAULT_LOG_BODY_LIMIT
}
