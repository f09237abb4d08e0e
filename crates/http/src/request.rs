//! Single outbound node request.
//!
//! A request is fully resolved before it is sent: links are applied, the URL
//! is absolute and the body is final. Sending attaches the client's current
//! credentials and logs the exchange.

use crate::auth::AuthenticatedClient;
use crate::config::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};
use url::Url;

/// Errors that can occur while sending a request.
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
}

impl Error {
    /// Whether the failure happened on the wire and the request may succeed when repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Reqwest { .. })
    }
}

/// Resolved node request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HashMap<String, String>,
    /// JSON body, sent only for methods that carry one.
    pub body: Option<Value>,
}

/// Raw response of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub body: String,
}

impl Response {
    /// Whether the server rejected the credentials.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self.status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        )
    }
}

impl Request {
    /// Sends the request once with the credentials of `client`.
    pub async fn send(&self, client: &AuthenticatedClient) -> Result<Response, Error> {
        let mut header_map = HeaderMap::new();
        for (key, value) in &self.headers {
            let header_name = HeaderName::try_from(key.as_str())
                .map_err(|source| Error::ReqwestInvalidHeaderName { source })?;
            let header_value = HeaderValue::try_from(value.as_str())
                .map_err(|source| Error::ReqwestInvalidHeaderValue { source })?;
            header_map.insert(header_name, header_value);
        }

        let mut request = client
            .http
            .request(self.method.into(), self.url.clone())
            .headers(header_map);
        request = client.credentials.apply(request);
        if self.method.has_body() {
            let body = self
                .body
                .clone()
                .unwrap_or_else(|| Value::Object(Default::default()));
            request = request.json(&body);
        }

        let limit = client.options.log_body_limit;
        let header_names: Vec<&str> = self.headers.keys().map(String::as_str).collect();
        info!(method = %self.method, url = %self.url, "Sending request");
        let request_body = self.body_text();
        debug!(headers = ?header_names, body = %truncate(&request_body, limit), "Request details");

        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|source| Error::Reqwest { source })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| Error::Reqwest { source })?;

        info!(
            method = %self.method,
            url = %self.url,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Received response"
        );
        debug!(body = %truncate(&body, limit), "Response details");

        Ok(Response { status, body })
    }

    fn body_text(&self) -> String {
        match (&self.body, self.method.has_body()) {
            (Some(body), true) => body.to_string(),
            (None, true) => "{}".to_string(),
            _ => String::new(),
        }
    }
}

/// Truncates `text` to at most `limit` bytes on a character boundary.
fn truncate(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
