//! Response body parsing and projection.
//!
//! Turns raw response text into a generic JSON tree according to the flow's
//! declared content type, and narrows that tree down to the sub-value a node
//! actually maps (`responseToMap`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Errors that can occur while parsing a response body.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Body is not valid JSON.
    #[error("Failed to parse JSON content: {source}")]
    SerdeJson {
        #[source]
        source: serde_json::Error,
    },
    /// Body is not well-formed XML.
    #[error("Failed to parse XML content: {source}")]
    Xml {
        #[source]
        source: quick_xml::Error,
    },
    /// Element closed without being opened, or left open at end of input.
    #[error("Unbalanced XML element: {name}")]
    UnbalancedXml { name: String },
}

/// Content type of upstream payloads.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// JSON documents.
    #[default]
    #[serde(alias = "Json", alias = "JSON")]
    Json,
    /// XML documents, mapped to a JSON-shaped tree before use.
    #[serde(alias = "Xml", alias = "XML")]
    Xml,
}

impl ContentType {
    /// Parses raw text into a JSON tree.
    pub fn parse(&self, raw: &str) -> Result<Value, Error> {
        match self {
            ContentType::Json => {
                serde_json::from_str(raw).map_err(|source| Error::SerdeJson { source })
            }
            ContentType::Xml => xml::to_value(raw),
        }
    }
}

/// Looks up `key` in `value`.
///
/// Objects are searched by direct key. Arrays are searched depth-first and the
/// value found in the first element containing the key is returned.
pub fn lookup<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => items.iter().find_map(|item| lookup(item, key)),
        _ => None,
    }
}

/// Resolves a response-to-map path against `value`.
///
/// A path starting with `/` is a JSON pointer. Anything else is first tried as
/// a single key, then as a dot-separated key path.
pub fn select<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.starts_with('/') {
        return value.pointer(path);
    }
    if let Some(found) = lookup(value, path) {
        return Some(found);
    }
    path.split('.')
        .try_fold(value, |current, segment| lookup(current, segment))
}

/// Projects `value` down to the sub-value at `path`, or `null` if absent.
pub fn project(value: Value, path: &str) -> Value {
    select(&value, path).cloned().unwrap_or(Value::Null)
}

/// XML to JSON-shaped tree mapping.
mod xml {
    use super::{Error, Map, Value};
    use quick_xml::events::{BytesStart, Event};
    use quick_xml::Reader;

    /// Element under construction.
    #[derive(Default)]
    struct Element {
        name: String,
        fields: Map<String, Value>,
        has_attributes: bool,
        text: String,
    }

    impl Element {
        fn open(start: &BytesStart<'_>) -> Result<Self, Error> {
            let mut element = Element {
                name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                ..Default::default()
            };
            for attribute in start.attributes() {
                let attribute = attribute.map_err(|e| Error::Xml { source: e.into() })?;
                let key = format!("@{}", String::from_utf8_lossy(attribute.key.as_ref()));
                let value = attribute
                    .unescape_value()
                    .map_err(|source| Error::Xml { source })?;
                element.fields.insert(key, Value::String(value.into_owned()));
                element.has_attributes = true;
            }
            Ok(element)
        }

        fn append(&mut self, name: String, value: Value) {
            match self.fields.get_mut(&name) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    self.fields.insert(name, value);
                }
            }
        }

        fn close(self) -> (String, Value) {
            let text = self.text.trim().to_string();
            if self.fields.is_empty() && !self.has_attributes {
                let value = if text.is_empty() {
                    Value::Null
                } else {
                    Value::String(text)
                };
                return (self.name, value);
            }
            let mut fields = self.fields;
            if !text.is_empty() {
                fields.insert("#text".to_string(), Value::String(text));
            }
            (self.name, Value::Object(fields))
        }
    }

    /// Parses an XML document into a JSON tree keyed by its root element.
    pub(super) fn to_value(raw: &str) -> Result<Value, Error> {
        let mut reader = Reader::from_str(raw);
        reader.config_mut().trim_text(true);

        let mut document = Element::default();
        let mut stack: Vec<Element> = Vec::new();

        loop {
            let event = reader
                .read_event()
                .map_err(|source| Error::Xml { source })?;
            match event {
                Event::Start(start) => stack.push(Element::open(&start)?),
                Event::Empty(start) => {
                    let (name, value) = Element::open(&start)?.close();
                    stack.last_mut().unwrap_or(&mut document).append(name, value);
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        let text = text.unescape().map_err(|source| Error::Xml { source })?;
                        current.text.push_str(&text);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Event::End(end) => {
                    let element = stack.pop().ok_or_else(|| Error::UnbalancedXml {
                        name: String::from_utf8_lossy(end.name().as_ref()).into_owned(),
                    })?;
                    let (name, value) = element.close();
                    stack.last_mut().unwrap_or(&mut document).append(name, value);
                }
                Event::Eof => break,
                // Declarations, comments, processing instructions and doctypes are dropped.
                _ => {}
            }
        }

        if let Some(open) = stack.pop() {
            return Err(Error::UnbalancedXml { name: open.name });
        }
        Ok(Value::Object(document.fields))
    }
}
