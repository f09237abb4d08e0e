//! Structural merge of result documents.
//!
//! One reconciliation rule is used everywhere results are combined: object keys
//! are unioned with the later document winning on collision, arrays are
//! concatenated in order. Containers only combine with their own kind; a
//! mismatched addition is skipped.

use serde_json::Value;
use tracing::debug;

/// Errors that can occur while merging documents.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The base value is neither an object nor an array.
    #[error("Cannot merge into a non-container value of kind {kind}")]
    NonContainer { kind: &'static str },
}

/// Merges every addition into `base` in list order and returns the result.
pub fn merge(mut base: Value, additions: impl IntoIterator<Item = Value>) -> Result<Value, Error> {
    merge_into(&mut base, additions)?;
    Ok(base)
}

/// Merges every addition into `base` in place.
///
/// An empty addition list is a no-op for any base, containers or not.
pub fn merge_into(
    base: &mut Value,
    additions: impl IntoIterator<Item = Value>,
) -> Result<(), Error> {
    let mut additions = additions.into_iter().peekable();
    if additions.peek().is_none() {
        return Ok(());
    }

    match base {
        Value::Object(map) => {
            for addition in additions {
                match addition {
                    Value::Object(other) => {
                        for (key, value) in other {
                            map.insert(key, value);
                        }
                    }
                    other => debug!(kind = kind_of(&other), "Skipping non-object merged into object"),
                }
            }
            Ok(())
        }
        Value::Array(items) => {
            for addition in additions {
                match addition {
                    Value::Array(other) => items.extend(other),
                    other => debug!(kind = kind_of(&other), "Skipping non-array merged into array"),
                }
            }
            Ok(())
        }
        other => Err(Error::NonContainer {
            kind: kind_of(other),
        }),
    }
}

/// Returns a short name of the JSON value kind for diagnostics.
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
