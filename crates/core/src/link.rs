//! Link resolution between a parent value and a child request.
//!
//! A link maps a placeholder token to a field of the nearest ancestor's
//! resolved value. Before a node is dispatched every token occurrence in its
//! path, in the header keyed by the token and in its body keys and values is
//! replaced with the stringified field value.

use crate::content;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error};

/// Errors that can occur while resolving a single link.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Link token is empty and would match everywhere.
    #[error("Link token for source field {source_path:?} is empty")]
    EmptyToken { source_path: String },
}

/// The parts of a request that links rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkTarget {
    /// Relative request path.
    pub path: String,
    /// Request headers, seeded from the flow headers.
    pub headers: HashMap<String, String>,
    /// Request body fields.
    pub body: HashMap<String, String>,
}

/// Resolves every link against `ancestor` and applies it to `target`.
///
/// A link whose source field is missing substitutes the source path literally.
/// A failing link is logged and skipped; the remaining links still apply.
pub fn resolve_links(
    links: &BTreeMap<String, String>,
    mut target: LinkTarget,
    ancestor: Option<&Value>,
) -> LinkTarget {
    for (token, source_path) in links {
        match resolve_link(token, source_path, ancestor) {
            Ok(value) => apply(&mut target, token, &value),
            Err(e) => error!(error = %e, token = %token, "Failed to resolve link"),
        }
    }
    target
}

/// Returns the substitution value for one link.
fn resolve_link(token: &str, source_path: &str, ancestor: Option<&Value>) -> Result<String, Error> {
    if token.is_empty() {
        return Err(Error::EmptyToken {
            source_path: source_path.to_string(),
        });
    }
    match ancestor.and_then(|value| content::lookup(value, source_path)) {
        Some(found) => Ok(stringify(found)),
        None => {
            debug!(token = %token, source = %source_path, "Link source not found, substituting literally");
            Ok(source_path.to_string())
        }
    }
}

/// Stringifies a linked value: strings verbatim, everything else as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn apply(target: &mut LinkTarget, token: &str, value: &str) {
    target.path = target.path.replace(token, value);

    if let Some(header) = target.headers.get_mut(token) {
        *header = value.to_string();
    }

    if !target.body.is_empty() {
        target.body = target
            .body
            .drain()
            .map(|(key, field)| (key.replace(token, value), field.replace(token, value)))
            .collect();
    }
}
