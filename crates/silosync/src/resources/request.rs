//! Privacy requests: bulk listing, approval, and the enrichers run for one
//! request.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::Result;
use crate::graphql::{GraphQLClient, GraphQLCollection};
use crate::paginate::{Filters, fetch_all};
use crate::runner::{RunOutcome, run_all_collect};
use crate::sync::{DEFAULT_CONCURRENCY, ProgressCallback};

/// Page size used when listing requests.
pub const REQUEST_PAGE_SIZE: usize = 50;

/// Status of requests waiting for approval.
pub const STATUS_APPROVING: &str = "APPROVING";

pub const REQUESTS: &str = r#"
query SilosyncRequests($first: Int!, $offset: Int!, $filterBy: RequestFiltersInput) {
  requests(filterBy: $filterBy, first: $first, offset: $offset) {
    nodes {
      id
      createdAt
      email
      link
      isSilent
      isTest
      coreIdentifier
      type
      status
      subjectType
    }
    totalCount
  }
}
"#;

pub const REQUEST_ENRICHERS: &str = r#"
query SilosyncRequestEnrichers($first: Int!, $offset: Int!, $requestId: ID!) {
  requestEnrichers(input: { requestId: $requestId }, first: $first, offset: $offset) {
    nodes {
      id
      status
      enricher {
        id
        title
        type
      }
    }
    totalCount
  }
}
"#;

pub const APPROVE_PRIVACY_REQUEST: &str = r#"
mutation SilosyncApproveRequest($input: CommunicationInput!) {
  approveRequest(input: $input) {
    request {
      id
    }
  }
}
"#;

pub const UPDATE_PRIVACY_REQUEST: &str = r#"
mutation SilosyncUpdateRequest($input: UpdateRequestInput!) {
  updateRequest(input: $input) {
    request {
      id
      isSilent
    }
  }
}
"#;

/// A privacy request as listed by the `requests` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyRequest {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub is_silent: bool,
    #[serde(default)]
    pub is_test: bool,
    #[serde(default)]
    pub core_identifier: Option<String>,
    /// Request action (ACCESS, ERASURE, ...).
    #[serde(rename = "type")]
    pub action: String,
    pub status: String,
    #[serde(default)]
    pub subject_type: Option<String>,
}

/// The enricher a request enricher runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnricherSource {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// One enricher's run against a privacy request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnricher {
    pub id: String,
    pub enricher: RequestEnricherSource,
    pub status: String,
}

/// Filters for [`fetch_all_requests`]. Empty fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFilters {
    pub actions: Vec<String>,
    pub statuses: Vec<String>,
    pub created_at_before: Option<DateTime<Utc>>,
    pub created_at_after: Option<DateTime<Utc>>,
    pub show_tests: Option<bool>,
}

impl RequestFilters {
    pub fn to_filters(&self) -> Filters {
        let mut filters = Filters::new();
        if !self.actions.is_empty() {
            filters.insert("type".into(), json!(self.actions));
        }
        if !self.statuses.is_empty() {
            filters.insert("status".into(), json!(self.statuses));
        }
        if let Some(show_tests) = self.show_tests {
            filters.insert("isTest".into(), json!(show_tests));
        }
        if let Some(before) = self.created_at_before {
            filters.insert("createdAtBefore".into(), json!(before.to_rfc3339()));
        }
        if let Some(after) = self.created_at_after {
            filters.insert("createdAtAfter".into(), json!(after.to_rfc3339()));
        }
        filters
    }
}

/// Fetch every request matching `filters`.
pub async fn fetch_all_requests(
    client: &GraphQLClient,
    filters: &RequestFilters,
    on_progress: Option<&ProgressCallback>,
) -> Result<Vec<PrivacyRequest>> {
    let started = Instant::now();
    let collection: GraphQLCollection<PrivacyRequest> =
        GraphQLCollection::new(client.clone(), "requests", REQUESTS);
    let requests = fetch_all(
        &collection,
        &filters.to_filters(),
        REQUEST_PAGE_SIZE,
        on_progress,
    )
    .await?;
    tracing::info!(
        count = requests.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Completed fetching of {} requests",
        requests.len()
    );
    Ok(requests)
}

/// Fetch every enricher run of the request `request_id`.
pub async fn fetch_all_request_enrichers(
    client: &GraphQLClient,
    request_id: &str,
    on_progress: Option<&ProgressCallback>,
) -> Result<Vec<RequestEnricher>> {
    let mut variables = serde_json::Map::new();
    variables.insert("requestId".into(), json!(request_id));
    let collection: GraphQLCollection<RequestEnricher> =
        GraphQLCollection::new(client.clone(), "requestEnrichers", REQUEST_ENRICHERS)
            .with_variables(variables);
    let enrichers = fetch_all(&collection, &Filters::new(), REQUEST_PAGE_SIZE, on_progress).await?;
    tracing::debug!(request_id, count = enrichers.len(), "Fetched request enrichers");
    Ok(enrichers)
}

/// Options for [`approve_requests`].
#[derive(Debug, Clone)]
pub struct ApproveOptions {
    /// Only approve requests with these actions (all when empty).
    pub actions: Vec<String>,
    /// Put requests created before this instant into silent mode first.
    pub silent_mode_before: Option<DateTime<Utc>>,
    /// Maximum approvals in flight.
    pub concurrency: usize,
}

impl Default for ApproveOptions {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
            silent_mode_before: None,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Whether a request must be switched to silent mode before approval.
pub fn needs_silent_mode(request: &PrivacyRequest, cutoff: Option<DateTime<Utc>>) -> bool {
    cutoff.is_some_and(|cutoff| request.created_at < cutoff)
}

/// Approve every request waiting for approval.
///
/// Failures are recorded per request id; the run never stops early.
#[tracing::instrument(skip(client, on_progress), fields(actions = ?options.actions))]
pub async fn approve_requests(
    client: &GraphQLClient,
    options: &ApproveOptions,
    on_progress: Option<&ProgressCallback>,
) -> Result<RunOutcome<()>> {
    let started = Instant::now();
    let filters = RequestFilters {
        actions: options.actions.clone(),
        statuses: vec![STATUS_APPROVING.to_string()],
        ..RequestFilters::default()
    };
    let requests = fetch_all_requests(client, &filters, on_progress).await?;
    tracing::info!("Approving {} requests", requests.len());

    let worker_client = client.clone();
    let cutoff = options.silent_mode_before;
    let outcome = run_all_collect(
        "approve requests",
        requests,
        options.concurrency,
        |request| request.id.clone(),
        move |request| {
            let client = worker_client.clone();
            async move {
                if needs_silent_mode(&request, cutoff) {
                    let _: serde_json::Value = client
                        .execute(
                            "UpdateRequest",
                            UPDATE_PRIVACY_REQUEST,
                            json!({ "input": { "id": request.id, "isSilent": true } }),
                        )
                        .await?;
                }
                let _: serde_json::Value = client
                    .execute(
                        "ApproveRequest",
                        APPROVE_PRIVACY_REQUEST,
                        json!({ "input": { "requestId": request.id } }),
                    )
                    .await?;
                Ok(())
            }
        },
        on_progress,
    )
    .await?;

    tracing::info!(
        approved = outcome.succeeded.len(),
        failed = outcome.failures.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Approved {} requests",
        outcome.succeeded.len()
    );
    Ok(outcome)
}
