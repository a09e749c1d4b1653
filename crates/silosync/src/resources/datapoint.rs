//! Datapoints of data silos.
//!
//! Datapoints have no snapshot to reconcile against: `updateOrCreateDataPoint`
//! upserts by silo and key, so every listed datapoint is sent as-is once its
//! silo has an id.

use serde_json::{Map, Value, json};

use crate::error::{Result, SyncError};
use crate::graphql::GraphQLClient;
use crate::manifest::{DataSiloInput, DatapointInput, FieldInput};
use crate::runner::run_all_collect;
use crate::sync::{KeyFailure, ProgressCallback, RemoteIndex, SyncOutcome};

/// Silos, and datapoints within one silo, synced at once.
pub const DATAPOINT_CONCURRENCY: usize = 5;

/// Name given to categories and purposes that do not set one.
const DEFAULT_SUB_NAME: &str = "Other";

pub const UPDATE_OR_CREATE_DATA_POINT: &str = r#"
mutation SilosyncUpdateOrCreateDataPoint(
  $dataSiloId: ID!
  $name: String!
  $path: [String!]
  $title: String
  $description: String
  $dataCollectionTag: String
  $querySuggestions: [DbIntegrationQuerySuggestionInput!]
  $enabledActions: [RequestActionObjectResolver!]
  $subDataPoints: [DataPointSubDataPointInput!]
) {
  updateOrCreateDataPoint(
    input: {
      dataSiloId: $dataSiloId
      name: $name
      path: $path
      title: $title
      description: $description
      dataCollectionTag: $dataCollectionTag
      querySuggestions: $querySuggestions
      enabledActions: $enabledActions
      subDataPoints: $subDataPoints
    }
  ) {
    dataPoint {
      id
    }
  }
}
"#;

fn insert_some<T: serde::Serialize>(map: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        map.insert(key.to_string(), json!(value));
    }
}

fn sub_data_point(field: &FieldInput) -> Value {
    let mut input = Map::new();
    input.insert("name".into(), json!(field.key));
    insert_some(&mut input, "description", field.description.as_ref());
    insert_some(
        &mut input,
        "categories",
        field.categories.as_ref().map(|categories| {
            categories
                .iter()
                .map(|c| {
                    json!({
                        "category": c.category,
                        "name": c.name.as_deref().unwrap_or(DEFAULT_SUB_NAME),
                    })
                })
                .collect::<Vec<_>>()
        }),
    );
    insert_some(
        &mut input,
        "purposes",
        field.purposes.as_ref().map(|purposes| {
            purposes
                .iter()
                .map(|p| {
                    json!({
                        "purpose": p.purpose,
                        "name": p.name.as_deref().unwrap_or(DEFAULT_SUB_NAME),
                    })
                })
                .collect::<Vec<_>>()
        }),
    );
    if !field.attributes.is_empty() {
        input.insert("attributes".into(), json!(field.attributes));
    }
    insert_some(
        &mut input,
        "accessRequestVisibilityEnabled",
        field.access_request_visibility_enabled,
    );
    insert_some(
        &mut input,
        "erasureRequestRedactionEnabled",
        field.erasure_request_redaction_enabled,
    );
    Value::Object(input)
}

/// Variables of one `updateOrCreateDataPoint` call.
///
/// Enabled actions are always sent, so a datapoint without
/// `privacy-actions` has every action turned off.
pub fn datapoint_variables(data_silo_id: &str, datapoint: &DatapointInput) -> Value {
    let mut input = Map::new();
    input.insert("dataSiloId".into(), json!(data_silo_id));
    input.insert("name".into(), json!(datapoint.key));
    insert_some(&mut input, "path", datapoint.path.as_ref());
    insert_some(&mut input, "title", datapoint.title.as_ref());
    insert_some(&mut input, "description", datapoint.description.as_ref());
    insert_some(
        &mut input,
        "dataCollectionTag",
        datapoint.data_collection_tag.as_ref(),
    );
    insert_some(
        &mut input,
        "querySuggestions",
        datapoint.privacy_action_queries.as_ref().map(|queries| {
            queries
                .iter()
                .map(|(action, query)| json!({ "requestType": action, "suggestedQuery": query }))
                .collect::<Vec<_>>()
        }),
    );
    input.insert(
        "enabledActions".into(),
        json!(datapoint.privacy_actions.as_deref().unwrap_or_default()),
    );
    insert_some(
        &mut input,
        "subDataPoints",
        datapoint
            .fields
            .as_ref()
            .map(|fields| fields.iter().map(sub_data_point).collect::<Vec<_>>()),
    );
    Value::Object(input)
}

/// Split a request ceiling into (silos, datapoints per silo) in flight.
fn fan_out(concurrency: usize) -> (usize, usize) {
    let silos = DATAPOINT_CONCURRENCY.min(concurrency).max(1);
    let per_silo = DATAPOINT_CONCURRENCY.min(concurrency / silos).max(1);
    (silos, per_silo)
}

fn datapoint_key(silo: &str, datapoint: &str) -> String {
    format!("{}/{}", silo, datapoint)
}

struct SiloDatapoints {
    id: String,
    title: String,
    datapoints: Vec<DatapointInput>,
}

async fn sync_silo_datapoints(
    client: GraphQLClient,
    silo: SiloDatapoints,
    concurrency: usize,
) -> Result<Vec<KeyFailure>> {
    let SiloDatapoints {
        id,
        title,
        datapoints,
    } = silo;
    let outcome = run_all_collect(
        &format!("datapoints of {}", title),
        datapoints,
        concurrency,
        |datapoint| datapoint.key.clone(),
        move |datapoint| {
            let client = client.clone();
            let variables = datapoint_variables(&id, &datapoint);
            async move {
                let _: Value = client
                    .execute("UpdateOrCreateDataPoint", UPDATE_OR_CREATE_DATA_POINT, variables)
                    .await?;
                Ok(())
            }
        },
        None,
    )
    .await?;

    Ok(outcome
        .failures
        .into_iter()
        .map(|failure| KeyFailure {
            key: datapoint_key(&title, &failure.key),
            message: failure.message,
        })
        .collect())
}

/// Upsert the datapoints of every silo in `silos`.
///
/// `index` maps silo titles to ids, typically the index of the silo sync
/// that just ran. At most `concurrency` requests are in flight, split
/// between silos and datapoints of one silo, each capped at
/// [`DATAPOINT_CONCURRENCY`]. Failures are recorded per datapoint under the
/// key `silo/datapoint`.
#[tracing::instrument(skip_all, fields(silos = silos.len()))]
pub async fn sync_datapoints(
    client: &GraphQLClient,
    silos: &[DataSiloInput],
    index: &RemoteIndex,
    concurrency: usize,
    on_progress: Option<&ProgressCallback>,
) -> Result<SyncOutcome> {
    if concurrency == 0 {
        return Err(SyncError::validation("concurrency must be greater than zero"));
    }
    let with_datapoints: Vec<&DataSiloInput> =
        silos.iter().filter(|s| !s.datapoints.is_empty()).collect();
    let attempted: usize = with_datapoints.iter().map(|s| s.datapoints.len()).sum();
    tracing::info!(
        datapoints = attempted,
        silos = with_datapoints.len(),
        "Syncing datapoints"
    );

    let mut failures = Vec::new();
    let mut work = Vec::with_capacity(with_datapoints.len());
    for silo in with_datapoints {
        match index.get(&silo.title) {
            Some(remote) => work.push(SiloDatapoints {
                id: remote.id.clone(),
                title: silo.title.clone(),
                datapoints: silo.datapoints.clone(),
            }),
            None => failures.extend(silo.datapoints.iter().map(|d| KeyFailure {
                key: datapoint_key(&silo.title, &d.key),
                message: format!("data silo \"{}\" has no remote id", silo.title),
            })),
        }
    }

    let silo_keys: Vec<Vec<String>> = work
        .iter()
        .map(|silo| {
            silo.datapoints
                .iter()
                .map(|d| datapoint_key(&silo.title, &d.key))
                .collect()
        })
        .collect();

    let (silo_concurrency, per_silo) = fan_out(concurrency);
    let client = client.clone();
    let outcome = run_all_collect(
        "sync datapoints",
        work,
        silo_concurrency,
        |silo| silo.title.clone(),
        move |silo| sync_silo_datapoints(client.clone(), silo, per_silo),
        on_progress,
    )
    .await?;

    for (_, silo_failures) in outcome.succeeded {
        failures.extend(silo_failures);
    }
    for failure in outcome.failures {
        let keys = silo_keys.get(failure.index).cloned().unwrap_or_default();
        failures.extend(keys.into_iter().map(|key| KeyFailure {
            key,
            message: failure.message.clone(),
        }));
    }

    Ok(SyncOutcome::from_failures(attempted, failures))
}
