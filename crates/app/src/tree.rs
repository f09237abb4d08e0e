//! Recursive call-tree processing.
//!
//! Siblings run concurrently and their results are joined in declaration
//! order. A child only starts once its parent's value is parsed, since links
//! resolve against that value. Node failures are logged and the node is left
//! out of its parent's results.

use crate::config::CallNode;
use apiflow_core::content::{self, ContentType};
use apiflow_core::link::{self, LinkTarget};
use apiflow_core::merge;
use apiflow_http::client::SharedClient;
use apiflow_http::request::Request;
use futures_util::future::{join_all, BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use url::Url;

/// Errors that make a node drop out of the results.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Request to {url} failed with status {status}: {body}")]
    Http {
        status: u16,
        url: Url,
        body: String,
    },
    #[error(transparent)]
    Client(#[from] apiflow_http::client::Error),
    #[error("Failed to join path {path:?} onto the base url: {source}")]
    Url {
        path: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Call node nested deeper than the maximum depth of {max_depth}")]
    DepthExceeded { max_depth: usize },
}

/// Executes call nodes of one flow run.
#[derive(Debug)]
pub struct TreeProcessor {
    client: Arc<SharedClient>,
    base_url: Url,
    headers: HashMap<String, String>,
    content_type: ContentType,
    max_depth: usize,
    /// Upper bound on array elements whose children run at the same time.
    element_concurrency: usize,
    cancel: CancellationToken,
}

impl TreeProcessor {
    pub fn new(
        client: Arc<SharedClient>,
        base_url: Url,
        headers: HashMap<String, String>,
        content_type: ContentType,
        max_depth: usize,
        element_concurrency: usize,
        cancel: CancellationToken,
    ) -> TreeProcessor {
        TreeProcessor {
            client,
            base_url,
            headers,
            content_type,
            max_depth,
            element_concurrency: element_concurrency.max(1),
            cancel,
        }
    }

    /// Processes `nodes` against `ancestor` and returns one value per surviving node, in order.
    pub fn process_nodes<'a>(
        &'a self,
        nodes: &'a [CallNode],
        ancestor: Option<&'a Value>,
        depth: usize,
    ) -> BoxFuture<'a, Vec<Value>> {
        async move {
            let results = join_all(
                nodes
                    .iter()
                    .map(|node| self.process_node(node, ancestor, depth)),
            )
            .await;

            nodes
                .iter()
                .zip(results)
                .filter_map(|(node, result)| match result {
                    Ok(value) => Some(value),
                    Err(e) => {
                        error!(
                            error = %e,
                            node = node.label(),
                            path = node.path.as_deref().unwrap_or_default(),
                            "Call node failed"
                        );
                        None
                    }
                })
                .collect()
        }
        .boxed()
    }

    async fn process_node(
        &self,
        node: &CallNode,
        ancestor: Option<&Value>,
        depth: usize,
    ) -> Result<Value, Error> {
        if depth >= self.max_depth {
            return Err(Error::DepthExceeded {
                max_depth: self.max_depth,
            });
        }

        let body = match &node.path {
            Some(path) => self.call(node, path, ancestor).await?,
            None => None,
        };
        let mut value = self.parse(node, body);

        if !node.children.is_empty() {
            self.process_children(node, &mut value, depth).await;
        }

        Ok(match &node.name {
            Some(name) => wrap(name, value),
            None => value,
        })
    }

    /// Dispatches the node's request and returns the body, `None` for "no content".
    async fn call(
        &self,
        node: &CallNode,
        path: &str,
        ancestor: Option<&Value>,
    ) -> Result<Option<String>, Error> {
        let target = LinkTarget {
            path: path.to_string(),
            headers: self.headers.clone(),
            body: node.body.clone(),
        };
        let target = link::resolve_links(&node.links, target, ancestor);

        let url = self.base_url.join(&target.path).map_err(|source| Error::Url {
            path: target.path.clone(),
            source,
        })?;
        let body = node.method.has_body().then(|| {
            Value::Object(
                target
                    .body
                    .into_iter()
                    .map(|(key, value)| (key, Value::String(value)))
                    .collect(),
            )
        });
        let request = Request {
            method: node.method,
            url,
            headers: target.headers,
            body,
        };

        let response = self.client.send(&request, &self.cancel).await?;
        if response.status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !response.status.is_success() {
            return Err(Error::Http {
                status: response.status.as_u16(),
                url: request.url,
                body: response.body,
            });
        }
        Ok(Some(response.body))
    }

    /// Parses the body, or the null substitute when there is none, and applies `responseToMap`.
    fn parse(&self, node: &CallNode, body: Option<String>) -> Value {
        let text = match body.filter(|body| !body.is_empty()) {
            Some(body) => body,
            None => match &node.null_substitute {
                Some(substitute) => link::stringify(substitute),
                None => return Value::Null,
            },
        };

        match self.content_type.parse(&text) {
            Ok(value) => match &node.response_to_map {
                Some(path) => content::project(value, path),
                None => value,
            },
            Err(e) => {
                error!(error = %e, node = node.label(), "Failed to parse node value");
                Value::Null
            }
        }
    }

    /// Runs the node's children against `value` and merges their results into it.
    ///
    /// A sequence runs the children once per element, seeded with that element.
    /// The whole value becomes null when any element cannot receive its results.
    async fn process_children(&self, node: &CallNode, value: &mut Value, depth: usize) {
        match value {
            Value::Array(elements) => {
                let futures: Vec<BoxFuture<'_, Vec<Value>>> = elements
                    .iter()
                    .map(|element| self.process_nodes(&node.children, Some(element), depth + 1))
                    .collect();
                let per_element: Vec<Vec<Value>> = stream::iter(futures)
                .buffered(self.element_concurrency)
                .collect()
                .await;

                let merged = elements
                    .iter_mut()
                    .zip(per_element)
                    .try_for_each(|(element, results)| merge::merge_into(element, results));
                match merged {
                    Ok(()) => debug!(
                        node = node.label(),
                        elements = elements.len(),
                        "Merged child results per element"
                    ),
                    Err(e) => {
                        error!(error = %e, node = node.label(), "Failed to merge child results");
                        *value = Value::Null;
                    }
                }
            }
            _ => {
                let results = self
                    .process_nodes(&node.children, Some(&*value), depth + 1)
                    .await;
                merge_logged(node, value, results);
            }
        }
    }
}

/// Merges child results into `target`, nulling it when it cannot receive them.
fn merge_logged(node: &CallNode, target: &mut Value, results: Vec<Value>) {
    if let Err(e) = merge::merge_into(target, results) {
        error!(error = %e, node = node.label(), "Failed to merge child results");
        *target = Value::Null;
    } else {
        debug!(node = node.label(), kind = merge::kind_of(target), "Merged child results");
    }
}

/// Nests container values under `name`; scalars pass through.
fn wrap(name: &str, value: Value) -> Value {
    match value {
        Value::Object(_) | Value::Array(_) => {
            let mut wrapped = Map::new();
            wrapped.insert(name.to_string(), value);
            Value::Object(wrapped)
        }
        scalar => scalar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiflow_core::retry::RetryConfig;
    use apiflow_http::auth::AuthenticatedClientBuilder;
    use apiflow_http::config::{ClientOptions, Method};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    async fn processor(base_url: &str, content_type: ContentType) -> TreeProcessor {
        let client = AuthenticatedClientBuilder::new()
            .options(Arc::new(ClientOptions::default()))
            .build()
            .unwrap();
        let retry = RetryConfig {
            max_attempts: 1,
            backoff: Duration::from_millis(1),
        };
        let client = SharedClient::connect(client, retry).await.unwrap();
        TreeProcessor::new(
            Arc::new(client),
            Url::parse(base_url).unwrap(),
            HashMap::new(),
            content_type,
            crate::config::DEFAULT_MAX_DEPTH,
            crate::config::DEFAULT_ELEMENT_CONCURRENCY,
            CancellationToken::new(),
        )
    }

    fn node(name: &str, path: &str) -> CallNode {
        CallNode {
            name: Some(name.to_string()),
            path: Some(path.to_string()),
            ..Default::default()
        }
    }

    fn links(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap("a", json!({"x": 1})), json!({"a": {"x": 1}}));
        assert_eq!(wrap("a", json!([1, 2])), json!({"a": [1, 2]}));
        assert_eq!(wrap("a", json!(5)), json!(5));
        assert_eq!(wrap("a", Value::Null), Value::Null);
    }

    #[tokio::test]
    async fn test_parent_child_links() {
        let server = MockServer::start_async().await;
        let user = server
            .mock_async(|when, then| {
                when.method(GET).path("/users/1");
                then.status(200).body(r#"{"id":7}"#);
            })
            .await;
        let orders = server
            .mock_async(|when, then| {
                when.method(GET).path("/orders").query_param("user", "7");
                then.status(200).body(r#"[{"id":101},{"id":102}]"#);
            })
            .await;

        let mut root = node("user", "/users/1");
        root.children = vec![CallNode {
            links: links(&[("{id}", "id")]),
            ..node("orders", "/orders?user={id}")
        }];

        let processor = processor(&server.base_url(), ContentType::Json).await;
        let results = processor.process_nodes(&[root], None, 0).await;

        user.assert_async().await;
        orders.assert_async().await;
        assert_eq!(
            results,
            vec![json!({"user": {"id": 7, "orders": [{"id": 101}, {"id": 102}]}})]
        );
    }

    #[tokio::test]
    async fn test_failed_node_is_omitted() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/broken");
                then.status(500).body("boom");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/ok");
                then.status(200).body(r#"{"fine":true}"#);
            })
            .await;

        let processor = processor(&server.base_url(), ContentType::Json).await;
        let nodes = [node("broken", "/broken"), node("ok", "/ok")];
        let results = processor.process_nodes(&nodes, None, 0).await;

        assert_eq!(results, vec![json!({"ok": {"fine": true}})]);
    }

    #[tokio::test]
    async fn test_null_substitute_without_path() {
        let server = MockServer::start_async().await;
        let any = server
            .mock_async(|when, then| {
                when.path_contains("/");
                then.status(200);
            })
            .await;

        let substitute = CallNode {
            null_substitute: Some(json!("42")),
            ..Default::default()
        };
        let processor = processor(&server.base_url(), ContentType::Json).await;
        let results = processor.process_nodes(&[substitute], None, 0).await;

        assert_eq!(results, vec![json!(42)]);
        assert_eq!(any.hits_async().await, 0);
    }

    #[tokio::test]
    async fn test_no_content_uses_null_substitute() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/items/1");
                then.status(204);
            })
            .await;

        let deleted = CallNode {
            method: Method::Delete,
            null_substitute: Some(json!(r#"{"deleted":true}"#)),
            ..node("result", "/items/1")
        };
        let processor = processor(&server.base_url(), ContentType::Json).await;
        let results = processor.process_nodes(&[deleted], None, 0).await;

        assert_eq!(results, vec![json!({"result": {"deleted": true}})]);
    }

    #[tokio::test]
    async fn test_parse_failure_still_runs_children() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/garbage");
                then.status(200).body("not json");
            })
            .await;
        let child = server
            .mock_async(|when, then| {
                when.method(GET).path("/child/id");
                then.status(200).body(r#"{"c":1}"#);
            })
            .await;

        let mut parent = node("parent", "/garbage");
        parent.children = vec![CallNode {
            links: links(&[("{id}", "id")]),
            ..node("child", "/child/{id}")
        }];
        let processor = processor(&server.base_url(), ContentType::Json).await;
        let results = processor.process_nodes(&[parent], None, 0).await;

        // The child resolves its link literally and runs, but a null parent cannot receive it.
        child.assert_async().await;
        assert_eq!(results, vec![Value::Null]);
    }

    #[tokio::test]
    async fn test_array_value_runs_children_per_element() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/users");
                then.status(200).body(r#"[{"id":1},{"id":2}]"#);
            })
            .await;
        let first = server
            .mock_async(|when, then| {
                when.method(GET).path("/users/1/profile");
                then.status(200).body(r#"{"bio":"one"}"#);
            })
            .await;
        let second = server
            .mock_async(|when, then| {
                when.method(GET).path("/users/2/profile");
                then.status(200).body(r#"{"bio":"two"}"#);
            })
            .await;

        let mut users = node("users", "/users");
        users.children = vec![CallNode {
            links: links(&[("{id}", "id")]),
            ..node("profile", "/users/{id}/profile")
        }];
        let processor = processor(&server.base_url(), ContentType::Json).await;
        let results = processor.process_nodes(&[users], None, 0).await;

        first.assert_async().await;
        second.assert_async().await;
        assert_eq!(
            results,
            vec![json!({"users": [
                {"id": 1, "profile": {"bio": "one"}},
                {"id": 2, "profile": {"bio": "two"}},
            ]})]
        );
    }

    #[tokio::test]
    async fn test_scalar_array_children_nulls_node() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/ids");
                then.status(200).body("[1,2]");
            })
            .await;
        let child = server
            .mock_async(|when, then| {
                when.method(GET).path("/child");
                then.status(200).body(r#"{"x":1}"#);
            })
            .await;

        let mut ids = node("ids", "/ids");
        ids.children = vec![node("child", "/child")];
        let processor = processor(&server.base_url(), ContentType::Json).await;
        let results = processor.process_nodes(&[ids], None, 0).await;

        assert_eq!(child.hits_async().await, 2);
        assert_eq!(results, vec![Value::Null]);
    }

    #[tokio::test]
    async fn test_element_fan_out_keeps_order_under_limit() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/items");
                then.status(200).body(r#"[{"id":1},{"id":2},{"id":3}]"#);
            })
            .await;
        let detail = server
            .mock_async(|when, then| {
                when.method(GET).path_contains("/items/");
                then.status(200)
                    .delay(Duration::from_millis(20))
                    .body(r#"{"seen":true}"#);
            })
            .await;

        let mut items = node("items", "/items");
        items.children = vec![CallNode {
            links: links(&[("{id}", "id")]),
            ..node("detail", "/items/{id}")
        }];
        let mut processor = processor(&server.base_url(), ContentType::Json).await;
        processor.element_concurrency = 1;
        let results = processor.process_nodes(&[items], None, 0).await;

        assert_eq!(detail.hits_async().await, 3);
        assert_eq!(
            results,
            vec![json!({"items": [
                {"id": 1, "detail": {"seen": true}},
                {"id": 2, "detail": {"seen": true}},
                {"id": 3, "detail": {"seen": true}},
            ]})]
        );
    }

    #[tokio::test]
    async fn test_response_to_map_and_post_body() {
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/search")
                    .header("x-tenant", "acme")
                    .json_body(json!({"query": "books"}));
                then.status(200)
                    .body(r#"{"meta":{"total":2},"data":{"items":[1,2]}}"#);
            })
            .await;

        let mut headers = HashMap::new();
        headers.insert("X-Tenant".to_string(), "acme".to_string());
        let mut processor = processor(&server.base_url(), ContentType::Json).await;
        processor.headers = headers;

        let search_node = CallNode {
            method: Method::Post,
            body: HashMap::from([("query".to_string(), "books".to_string())]),
            response_to_map: Some("data.items".to_string()),
            ..node("items", "/search")
        };
        let results = processor.process_nodes(&[search_node], None, 0).await;

        search.assert_async().await;
        assert_eq!(results, vec![json!({"items": [1, 2]})]);
    }

    #[tokio::test]
    async fn test_missing_projection_yields_null() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/a");
                then.status(200).body(r#"{"x":1}"#);
            })
            .await;

        let projected = CallNode {
            response_to_map: Some("/missing/path".to_string()),
            ..node("a", "/a")
        };
        let processor = processor(&server.base_url(), ContentType::Json).await;
        let results = processor.process_nodes(&[projected], None, 0).await;
        assert_eq!(results, vec![Value::Null]);
    }

    #[tokio::test]
    async fn test_xml_content() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/feed");
                then.status(200)
                    .body(r#"<feed><title>News</title><entry>a</entry><entry>b</entry></feed>"#);
            })
            .await;

        let feed = CallNode {
            response_to_map: Some("feed".to_string()),
            ..node("feed", "/feed")
        };
        let processor = processor(&server.base_url(), ContentType::Xml).await;
        let results = processor.process_nodes(&[feed], None, 0).await;
        assert_eq!(
            results,
            vec![json!({"feed": {"title": "News", "entry": ["a", "b"]}})]
        );
    }

    #[tokio::test]
    async fn test_depth_guard() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/level");
                then.status(200).body(r#"{"ok":true}"#);
            })
            .await;

        let mut processor = processor(&server.base_url(), ContentType::Json).await;
        processor.max_depth = 2;

        let grandchild = node("grandchild", "/level");
        let mut child = node("child", "/level");
        child.children = vec![grandchild];
        let mut root = node("root", "/level");
        root.children = vec![child];

        let results = processor.process_nodes(&[root], None, 0).await;
        assert_eq!(
            results,
            vec![json!({"root": {"ok": true, "child": {"ok": true}}})]
        );
    }

    #[tokio::test]
    async fn test_cancelled_node_is_omitted() {
        let server = MockServer::start_async().await;
        let slow = server
            .mock_async(|when, then| {
                when.method(GET).path("/slow");
                then.status(200).body("{}");
            })
            .await;

        let processor = processor(&server.base_url(), ContentType::Json).await;
        processor.cancel.cancel();
        let results = processor
            .process_nodes(&[node("slow", "/slow")], None, 0)
            .await;

        assert!(results.is_empty());
        assert_eq!(slow.hits_async().await, 0);
    }
}
