//! Resource adapters: the GraphQL documents and [`SyncTarget`]
//! implementations for each resource `push` understands, plus `pull` and
//! request approval.
//!
//! [`SyncTarget`]: crate::sync::SyncTarget

mod attributes;
mod consent_manager;
mod data_silo;
mod datapoint;
mod enricher;
mod processing_purpose;
mod request;

use std::sync::Arc;

use crate::error::{Result, short_error_message};
use crate::graphql::GraphQLClient;
use crate::manifest::{ConsentManagerInput, DataSiloInput, Manifest};
use crate::sync::{
    DEFAULT_CONCURRENCY, ProgressCallback, SyncOptions, SyncOutcome, SyncReport, SyncTarget, sync,
};

pub use attributes::{AttributeKey, AttributeValue, format_attribute_values};
pub use consent_manager::{ConsentManagerSync, sync_consent_manager};
pub use data_silo::{DataSilo, DataSiloTarget, pull_data_silos, sync_data_silo_dependencies};
pub use datapoint::{DATAPOINT_CONCURRENCY, datapoint_variables, sync_datapoints};
pub use enricher::{ALL_REQUEST_ACTIONS, Enricher, EnricherTarget, Identifier};
pub use processing_purpose::{ProcessingPurpose, ProcessingPurposeTarget};
pub use request::{
    ApproveOptions, PrivacyRequest, REQUEST_PAGE_SIZE, RequestEnricher, RequestEnricherSource,
    RequestFilters, STATUS_APPROVING, approve_requests, fetch_all_request_enrichers,
    fetch_all_requests, needs_silent_mode,
};

/// Options for [`push_manifest`].
#[derive(Debug, Clone)]
pub struct PushOptions {
    /// Options of every keyed sync.
    pub sync: SyncOptions,
    /// Ceiling on requests in flight for per-item writes (datapoints).
    pub concurrency: usize,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            sync: SyncOptions::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// A resource whose sync stopped before the update phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortedSync {
    pub resource: String,
    pub message: String,
}

/// Outcome of a push step that runs after a keyed sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub resource: String,
    pub outcome: SyncOutcome,
}

impl StepReport {
    #[must_use]
    pub fn success(&self) -> bool {
        self.outcome.failures.is_empty()
    }
}

/// Result of pushing a whole manifest.
#[derive(Debug, Default)]
pub struct PushResult {
    /// One report per resource that ran to completion.
    pub reports: Vec<SyncReport>,
    /// Datapoints, silo dependencies and the consent manager.
    pub steps: Vec<StepReport>,
    /// Resources whose sync failed outright.
    pub aborted: Vec<AbortedSync>,
}

impl PushResult {
    #[must_use]
    pub fn success(&self) -> bool {
        self.aborted.is_empty()
            && self.reports.iter().all(SyncReport::success)
            && self.steps.iter().all(StepReport::success)
    }

    fn abort(&mut self, resource: &str, e: crate::error::SyncError) {
        tracing::error!(resource, "Sync failed: {}", e);
        self.aborted.push(AbortedSync {
            resource: resource.to_string(),
            message: short_error_message(&e),
        });
    }

    fn record(&mut self, resource: &str, result: Result<SyncReport>) {
        match result {
            Ok(report) => self.reports.push(report),
            Err(e) => self.abort(resource, e),
        }
    }

    fn record_step(&mut self, resource: &str, result: Result<SyncOutcome>) {
        match result {
            Ok(outcome) => self.steps.push(StepReport {
                resource: resource.to_string(),
                outcome,
            }),
            Err(e) => self.abort(resource, e),
        }
    }
}

async fn sync_resource<T: SyncTarget>(
    target: T,
    desired: Vec<T::Desired>,
    options: &SyncOptions,
    on_progress: Option<&ProgressCallback>,
) -> (String, Result<SyncReport>) {
    let resource = target.resource_name().to_string();
    let outcome = sync(Arc::new(target), desired, options, on_progress).await;
    (resource, outcome)
}

/// Datapoints, then deletion dependencies, once every silo has an id.
async fn push_silo_extras(
    result: &mut PushResult,
    client: &GraphQLClient,
    silos: &[DataSiloInput],
    report: &SyncReport,
    options: &PushOptions,
    on_progress: Option<&ProgressCallback>,
) {
    let datapoints: usize = silos.iter().map(|s| s.datapoints.len()).sum();
    let dependencies = silos
        .iter()
        .filter(|s| s.deletion_dependencies.is_some())
        .count();
    if report.dry_run {
        tracing::info!(datapoints, dependencies, "Dry run: skipping datapoints and dependencies");
        return;
    }

    if datapoints > 0 {
        let outcome =
            sync_datapoints(client, silos, &report.index, options.concurrency, on_progress).await;
        result.record_step("datapoints", outcome);
    }
    if dependencies > 0 {
        let outcome =
            sync_data_silo_dependencies(client, silos, &report.index, options.sync.batch_limit)
                .await;
        result.record_step("data silo dependencies", outcome);
    }
}

async fn push_consent_manager(
    result: &mut PushResult,
    client: &GraphQLClient,
    consent_manager: &ConsentManagerInput,
    dry_run: bool,
) {
    if dry_run {
        tracing::info!("Dry run: skipping consent manager");
        return;
    }
    let outcome = sync_consent_manager(client, consent_manager)
        .await
        .map(|_| SyncOutcome::from_failures(1, Vec::new()));
    result.record_step("consent manager", outcome);
}

/// Sync every resource of `manifest`: data silos with their datapoints and
/// dependencies, processing purposes, enrichers, then the consent manager.
/// Empty sections are skipped. A resource that fails outright does not stop
/// the ones after it.
pub async fn push_manifest(
    client: &GraphQLClient,
    manifest: Manifest,
    options: &PushOptions,
    on_progress: Option<&ProgressCallback>,
) -> PushResult {
    let mut result = PushResult::default();

    if !manifest.data_silos.is_empty() {
        let silos = manifest.data_silos;
        let (resource, outcome) = sync_resource(
            DataSiloTarget::new(client.clone()),
            silos.clone(),
            &options.sync,
            on_progress,
        )
        .await;
        match outcome {
            Ok(report) => {
                push_silo_extras(&mut result, client, &silos, &report, options, on_progress)
                    .await;
                result.reports.push(report);
            }
            Err(e) => result.abort(&resource, e),
        }
    }

    if !manifest.processing_purposes.is_empty() {
        let (resource, outcome) = sync_resource(
            ProcessingPurposeTarget::new(client.clone()),
            manifest.processing_purposes,
            &options.sync,
            on_progress,
        )
        .await;
        result.record(&resource, outcome);
    }

    if !manifest.enrichers.is_empty() {
        match EnricherTarget::load(client.clone(), options.sync.page_size, on_progress).await {
            Ok(target) => {
                let (resource, outcome) =
                    sync_resource(target, manifest.enrichers, &options.sync, on_progress).await;
                result.record(&resource, outcome);
            }
            Err(e) => result.abort("enrichers", e),
        }
    }

    if let Some(consent_manager) = &manifest.consent_manager {
        push_consent_manager(&mut result, client, consent_manager, options.sync.dry_run).await;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpMethod, HttpResponse, MockTransport};
    use crate::manifest::{DatapointInput, parse_manifest};
    use serde_json::json;

    const URL: &str = "https://api.example.test/graphql";

    fn ok(body: serde_json::Value) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: serde_json::to_vec(&body).expect("serialize"),
        }
    }

    const MANIFEST: &str = r#"
data-silos:
  - title: Postgres
    integration-name: server
    deletion-dependencies: [Zendesk]
    datapoints:
      - key: users
  - title: Zendesk
    integration-name: zendesk
"#;

    #[tokio::test]
    async fn silos_then_datapoints_then_dependencies() {
        let transport = MockTransport::new();
        for body in [
            json!({"data": {"dataSilos": {
                "nodes": [{"id": "s1", "title": "Postgres", "type": "server"}],
                "totalCount": 1
            }}}),
            json!({"data": {"createDataSilos": {"dataSilos": [{"id": "s2", "title": "Zendesk"}]}}}),
            json!({"data": {"updateDataSilos": {"clientMutationId": null}}}),
            json!({"data": {"updateOrCreateDataPoint": {"dataPoint": {"id": "d1"}}}}),
            json!({"data": {"updateDataSilos": {"clientMutationId": null}}}),
        ] {
            transport.push_response(HttpMethod::Post, URL, ok(body));
        }
        let client = GraphQLClient::new_with_transport(
            "https://api.example.test",
            "k",
            Arc::new(transport.clone()),
        );
        let manifest =
            parse_manifest("push", MANIFEST, &Default::default()).expect("manifest");

        let result = push_manifest(&client, manifest, &PushOptions::default(), None).await;
        assert!(result.success(), "{:?}", result.aborted);
        assert_eq!(result.reports[0].created, 1);
        let steps: Vec<&str> = result.steps.iter().map(|s| s.resource.as_str()).collect();
        assert_eq!(steps, vec!["datapoints", "data silo dependencies"]);

        let bodies: Vec<serde_json::Value> = transport
            .requests()
            .iter()
            .map(|r| serde_json::from_slice(&r.body).expect("json"))
            .collect();
        assert_eq!(bodies.len(), 5);
        let update = &bodies[2]["variables"]["input"]["dataSilos"];
        assert!(update[0].get("dependedOnDataSiloTitles").is_none());
        assert_eq!(update[1]["dependedOnDataSiloTitles"], json!([]));
        assert_eq!(bodies[3]["variables"]["dataSiloId"], "s1");
        assert_eq!(
            bodies[4]["variables"]["input"]["dataSilos"],
            json!([{"id": "s1", "dependedOnDataSiloTitles": ["Zendesk"]}])
        );
    }

    #[tokio::test]
    async fn dry_run_skips_follow_up_writes() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Post,
            URL,
            ok(json!({"data": {"dataSilos": {"nodes": [], "totalCount": 0}}})),
        );
        let client = GraphQLClient::new_with_transport(
            "https://api.example.test",
            "k",
            Arc::new(transport.clone()),
        );
        let mut manifest =
            parse_manifest("push", MANIFEST, &Default::default()).expect("manifest");
        manifest.data_silos[1].datapoints.push(DatapointInput {
            key: "tickets".into(),
            title: None,
            description: None,
            path: None,
            data_collection_tag: None,
            privacy_action_queries: None,
            privacy_actions: None,
            fields: None,
        });
        manifest.consent_manager = Some(ConsentManagerInput::default());
        let options = PushOptions {
            sync: SyncOptions {
                dry_run: true,
                ..SyncOptions::default()
            },
            ..PushOptions::default()
        };

        let result = push_manifest(&client, manifest, &options, None).await;
        assert!(result.success());
        assert!(result.steps.is_empty());
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn failed_step_fails_the_push() {
        let mut result = PushResult::default();
        result.record_step(
            "datapoints",
            Ok(SyncOutcome::from_failures(
                2,
                vec![crate::sync::KeyFailure {
                    key: "Postgres/users".into(),
                    message: "Invalid path".into(),
                }],
            )),
        );
        assert!(!result.success());
        assert_eq!(result.steps[0].outcome.succeeded, 1);
    }
}
