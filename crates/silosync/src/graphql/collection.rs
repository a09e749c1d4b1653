use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::client::GraphQLClient;
use super::error::GraphQLError;
use crate::error::{Result, SyncError};
use crate::paginate::{Page, PageRequest, PageSource};
use crate::retry::RetryError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection<T> {
    nodes: Vec<T>,
    #[serde(default)]
    total_count: Option<u64>,
}

/// A paginated GraphQL collection.
///
/// The query must accept `$first: Int!`, `$offset: Int!` and an optional
/// `$filterBy` argument and select `{ nodes { ... } totalCount }` under
/// `field`. Variables set with [`with_variables`](Self::with_variables) are
/// sent with every page.
pub struct GraphQLCollection<T> {
    client: GraphQLClient,
    field: String,
    query: String,
    variables: serde_json::Map<String, serde_json::Value>,
    _node: PhantomData<fn() -> T>,
}

impl<T> GraphQLCollection<T> {
    pub fn new(client: GraphQLClient, field: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            client,
            field: field.into(),
            query: query.into(),
            variables: serde_json::Map::new(),
            _node: PhantomData,
        }
    }

    /// Add fixed top-level variables, such as a parent id.
    #[must_use]
    pub fn with_variables(mut self, variables: serde_json::Map<String, serde_json::Value>) -> Self {
        self.variables.extend(variables);
        self
    }
}

#[async_trait]
impl<T> PageSource<T> for GraphQLCollection<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn collection(&self) -> &str {
        &self.field
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page<T>> {
        let mut variables = serde_json::Value::Object(self.variables.clone());
        variables["first"] = serde_json::json!(request.page_size);
        variables["offset"] = serde_json::json!(request.offset);
        if !request.filters.is_empty() {
            variables["filterBy"] = serde_json::Value::Object(request.filters.clone());
        }

        let mut data: serde_json::Map<String, serde_json::Value> = self
            .client
            .execute(&self.field, &self.query, variables)
            .await?;

        let connection = data.remove(&self.field).ok_or_else(|| {
            SyncError::Request(RetryError::Fatal(GraphQLError::MissingData {
                field: self.field.clone(),
            }))
        })?;
        let connection: Connection<T> = serde_json::from_value(connection).map_err(|e| {
            SyncError::response(format!("could not decode {}: {}", self.field, e))
        })?;

        Ok(Page {
            nodes: connection.nodes,
            total_count: connection.total_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpMethod, HttpResponse, MockTransport};
    use crate::paginate::{Filters, fetch_all};
    use serde_json::json;
    use std::sync::Arc;

    const URL: &str = "https://api.example.test/graphql";

    #[derive(Debug, Deserialize, PartialEq)]
    struct Node {
        id: String,
    }

    fn page(ids: &[&str], total: u64) -> HttpResponse {
        let nodes: Vec<_> = ids.iter().map(|id| json!({"id": id})).collect();
        HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: serde_json::to_vec(&json!({
                "data": {"things": {"nodes": nodes, "totalCount": total}}
            }))
            .expect("serialize"),
        }
    }

    #[tokio::test]
    async fn pages_through_connection_with_offset_variables() {
        let transport = MockTransport::new();
        transport.push_response(HttpMethod::Post, URL, page(&["a", "b"], 3));
        transport.push_response(HttpMethod::Post, URL, page(&["c"], 3));

        let client = GraphQLClient::new_with_transport(
            "https://api.example.test",
            "k",
            Arc::new(transport.clone()),
        );
        let collection: GraphQLCollection<Node> =
            GraphQLCollection::new(client, "things", "query Things { things { nodes { id } } }");

        let nodes = fetch_all(&collection, &Filters::new(), 2, None)
            .await
            .expect("fetch");
        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let requests = transport.requests();
        let second: serde_json::Value =
            serde_json::from_slice(&requests[1].body).expect("json body");
        assert_eq!(second["variables"]["first"], 2);
        assert_eq!(second["variables"]["offset"], 2);
        assert!(second["variables"].get("filterBy").is_none());
    }

    #[tokio::test]
    async fn filters_become_filter_by() {
        let transport = MockTransport::new();
        transport.push_response(HttpMethod::Post, URL, page(&[], 0));

        let client = GraphQLClient::new_with_transport(
            "https://api.example.test",
            "k",
            Arc::new(transport.clone()),
        );
        let collection: GraphQLCollection<Node> = GraphQLCollection::new(client, "things", "q");
        let mut filters = Filters::new();
        filters.insert("text".into(), json!("sales"));
        fetch_all(&collection, &filters, 10, None)
            .await
            .expect("fetch");

        let body: serde_json::Value =
            serde_json::from_slice(&transport.requests()[0].body).expect("json body");
        assert_eq!(body["variables"]["filterBy"]["text"], "sales");
    }

    #[tokio::test]
    async fn fixed_variables_go_with_every_page() {
        let transport = MockTransport::new();
        transport.push_response(HttpMethod::Post, URL, page(&["a"], 2));
        transport.push_response(HttpMethod::Post, URL, page(&[], 2));

        let client = GraphQLClient::new_with_transport(
            "https://api.example.test",
            "k",
            Arc::new(transport.clone()),
        );
        let mut fixed = serde_json::Map::new();
        fixed.insert("parentId".into(), json!("p-1"));
        let collection: GraphQLCollection<Node> =
            GraphQLCollection::new(client, "things", "q").with_variables(fixed);
        fetch_all(&collection, &Filters::new(), 1, None)
            .await
            .expect("fetch");

        for request in transport.requests() {
            let body: serde_json::Value = serde_json::from_slice(&request.body).expect("json");
            assert_eq!(body["variables"]["parentId"], "p-1");
        }
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn missing_root_field_is_an_error() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Post,
            URL,
            HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: br#"{"data": {"other": {"nodes": []}}}"#.to_vec(),
            },
        );
        let client = GraphQLClient::new_with_transport(
            "https://api.example.test",
            "k",
            Arc::new(transport),
        );
        let collection: GraphQLCollection<Node> = GraphQLCollection::new(client, "things", "q");
        let err = fetch_all(&collection, &Filters::new(), 10, None)
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("things"));
    }
}
