//! Credential acquisition for the supported authentication protocols.
//!
//! Direct workflows attach credentials without a round trip. Token workflows
//! post a credential payload to the protocol's token endpoint on a dedicated
//! short-lived client and extract a bearer token from the response.

use crate::config::{
    ApiKeyProtocol, AuthProtocol, BasicAuth, BasicProtocol, BasicWorkflow, ClientOptions,
    Credentials, OAuth2Protocol, OAuth2Workflow,
};
use apiflow_core::link::stringify;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Response fields probed for a bearer token, in order.
pub const TOKEN_FIELDS: &[&str] = &["access_token", "token", "accessToken"];

/// Response fields probed for an authorization code, in order.
pub const CODE_FIELDS: &[&str] = &["code", "key"];

/// Errors that can occur while acquiring credentials.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("HTTP request error: {source}")]
    Reqwest {
        #[source]
        source: reqwest::Error,
    },
    #[error("Invalid HTTP header name: {source}")]
    ReqwestInvalidHeaderName {
        #[source]
        source: reqwest::header::InvalidHeaderName,
    },
    #[error("Invalid HTTP header value: {source}")]
    ReqwestInvalidHeaderValue {
        #[source]
        source: reqwest::header::InvalidHeaderValue,
    },
    #[error("Credential exchange response is not valid JSON: {source}")]
    SerdeJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("Credential exchange failed with status {status}: {body}")]
    TokenExchange { status: u16, body: String },
    #[error("None of the fields [{fields}] were found in the credential exchange response")]
    CredentialExtraction { fields: String },
    #[error("Unsupported authentication workflow: {0}")]
    UnsupportedWorkflow(String),
    #[error("Missing token endpoint url for the {0} protocol")]
    MissingUrl(&'static str),
    #[error("Missing required builder attribute: {}", _0)]
    MissingBuilderAttribute(String),
}

/// HTTP client together with the credentials attached to every request.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    /// Underlying pooled HTTP client.
    pub http: reqwest::Client,
    /// Credentials from the last successful authentication.
    pub credentials: Credentials,
    /// Transport options.
    pub options: Arc<ClientOptions>,
    /// Protocol credentials are acquired with, none for anonymous flows.
    protocol: Option<Arc<AuthProtocol>>,
}

impl apiflow_core::client::Client for AuthenticatedClient {
    type Error = Error;

    /// Acquires fresh credentials, replacing any previous ones.
    async fn connect(mut self) -> Result<Self, Error> {
        self.credentials = match &self.protocol {
            Some(protocol) => {
                info!(protocol = protocol.as_str(), "Authenticating");
                authenticate(protocol, &self.options).await?
            }
            None => Credentials::default(),
        };
        Ok(self)
    }
}

/// Builder for an unauthenticated [`AuthenticatedClient`].
#[derive(Debug, Default)]
pub struct AuthenticatedClientBuilder {
    protocol: Option<Arc<AuthProtocol>>,
    options: Option<Arc<ClientOptions>>,
}

impl AuthenticatedClientBuilder {
    pub fn new() -> AuthenticatedClientBuilder {
        AuthenticatedClientBuilder {
            ..Default::default()
        }
    }

    pub fn protocol(mut self, protocol: Option<Arc<AuthProtocol>>) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn options(mut self, options: Arc<ClientOptions>) -> Self {
        self.options = Some(options);
        self
    }

    /// Builds the transport client. Credentials are acquired by `connect`.
    pub fn build(self) -> Result<AuthenticatedClient, Error> {
        let options = self
            .options
            .ok_or_else(|| Error::MissingBuilderAttribute("options".to_string()))?;
        let http = http_client(None, &options)?;
        Ok(AuthenticatedClient {
            http,
            credentials: Credentials::default(),
            options,
            protocol: self.protocol,
        })
    }
}

/// Acquires credentials for `protocol`.
pub async fn authenticate(
    protocol: &AuthProtocol,
    options: &ClientOptions,
) -> Result<Credentials, Error> {
    match protocol {
        AuthProtocol::Basic(basic) => authenticate_basic(basic, options).await,
        AuthProtocol::OAuth2(oauth2) => authenticate_oauth2(oauth2, options).await,
        AuthProtocol::ApiKey(api_key) => authenticate_api_key(api_key, options).await,
    }
}

async fn authenticate_basic(
    protocol: &BasicProtocol,
    options: &ClientOptions,
) -> Result<Credentials, Error> {
    let basic_auth = BasicAuth {
        username: protocol.username.clone().unwrap_or_default(),
        password: protocol.password.clone().unwrap_or_default(),
    };

    match protocol.workflow {
        BasicWorkflow::Basic => Ok(Credentials {
            basic_auth: Some(basic_auth),
            ..Default::default()
        }),
        BasicWorkflow::Token => {
            let url = protocol.url.as_deref().ok_or(Error::MissingUrl("basic"))?;
            let client = http_client(protocol.headers.as_ref(), options)?;
            let payload = json!({
                "grantType": "client_credentials",
                "grant_type": "client_credentials",
            });
            let request = client
                .post(url)
                .basic_auth(&basic_auth.username, Some(&basic_auth.password))
                .json(&payload);
            let response = exchange(request).await?;
            Ok(Credentials {
                bearer_auth: Some(extract_token(&response)?),
                ..Default::default()
            })
        }
    }
}

/// Credential payload covering the field names authorization servers commonly expect.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CredentialPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<&'a str>,
    grant_type: &'a str,
    #[serde(rename = "grant_type")]
    grant_type_snake: &'a str,
    scope: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    login: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
}

impl<'a> CredentialPayload<'a> {
    fn new(protocol: &'a OAuth2Protocol, grant_type: &'a str) -> Self {
        let username = protocol.username.as_deref();
        CredentialPayload {
            client_id: protocol.client_id.as_deref(),
            client_secret: protocol.client_secret.as_deref(),
            grant_type,
            grant_type_snake: grant_type,
            scope: "email",
            email: username,
            login: username,
            username,
            password: protocol.password.as_deref(),
        }
    }
}

async fn authenticate_oauth2(
    protocol: &OAuth2Protocol,
    options: &ClientOptions,
) -> Result<Credentials, Error> {
    let grant_type = protocol
        .workflow
        .grant_type()
        .ok_or_else(|| Error::UnsupportedWorkflow(format!("{:?}", protocol.workflow)))?;
    let client = http_client(protocol.headers.as_ref(), options)?;
    let payload = CredentialPayload::new(protocol, grant_type);

    let token = match protocol.workflow {
        OAuth2Workflow::AuthorizationCode => {
            let response = exchange(client.post(&protocol.url).json(&payload)).await?;
            let code = extract(&response, CODE_FIELDS)?;
            debug!("Authorization code received, exchanging for token");

            let response =
                exchange(client.post(&protocol.url).json(&json!({ "code": code }))).await?;
            extract_token(&response)?
        }
        _ => {
            let response = exchange(client.post(&protocol.url).json(&payload)).await?;
            extract_token(&response)?
        }
    };

    Ok(Credentials {
        bearer_auth: Some(token),
        ..Default::default()
    })
}

async fn authenticate_api_key(
    protocol: &ApiKeyProtocol,
    options: &ClientOptions,
) -> Result<Credentials, Error> {
    let api_key = protocol.api_key.clone();

    match protocol.workflow {
        BasicWorkflow::Basic => Ok(Credentials {
            api_key: Some(api_key),
            ..Default::default()
        }),
        BasicWorkflow::Token => {
            let url = protocol.url.as_deref().ok_or(Error::MissingUrl("api_key"))?;
            let client = http_client(protocol.headers.as_ref(), options)?;
            let payload = json!({
                "key": api_key,
                "apiKey": api_key,
                "secretKey": api_key,
            });
            let response = exchange(client.post(url).json(&payload)).await?;
            Ok(Credentials {
                bearer_auth: Some(extract_token(&response)?),
                api_key: Some(api_key),
                ..Default::default()
            })
        }
    }
}

/// Sends a credential exchange request and parses the JSON response.
async fn exchange(request: reqwest::RequestBuilder) -> Result<Value, Error> {
    let response = request
        .send()
        .await
        .map_err(|source| Error::Reqwest { source })?;

    let status = response.status();
    let url = response.url().to_string();
    let body = response
        .text()
        .await
        .map_err(|source| Error::Reqwest { source })?;
    info!(url = %url, status = status.as_u16(), "Credential exchange completed");

    if !status.is_success() {
        return Err(Error::TokenExchange {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|source| Error::SerdeJson { source })
}

/// Extracts a bearer token from a credential exchange response.
pub fn extract_token(response: &Value) -> Result<String, Error> {
    extract(response, TOKEN_FIELDS)
}

/// Returns the first present, non-null field of `fields`, stringified.
pub fn extract(response: &Value, fields: &[&str]) -> Result<String, Error> {
    fields
        .iter()
        .find_map(|field| response.get(field).filter(|value| !value.is_null()))
        .map(stringify)
        .ok_or_else(|| Error::CredentialExtraction {
            fields: fields.join(", "),
        })
}

/// Builds an HTTP client with optional default headers.
fn http_client(
    headers: Option<&HashMap<String, String>>,
    options: &ClientOptions,
) -> Result<reqwest::Client, Error> {
    let mut header_map = HeaderMap::new();
    if let Some(headers) = headers {
        for (key, value) in headers {
            let header_name = HeaderName::try_from(key.as_str())
                .map_err(|source| Error::ReqwestInvalidHeaderName { source })?;
            let header_value = HeaderValue::try_from(value.as_str())
                .map_err(|source| Error::ReqwestInvalidHeaderValue { source })?;
            header_map.insert(header_name, header_value);
        }
    }

    reqwest::ClientBuilder::new()
        .default_headers(header_map)
        .timeout(options.timeout)
        .danger_accept_invalid_certs(options.accept_invalid_certs)
        .build()
        .map_err(|source| Error::Reqwest { source })
}
