//! Data silos, keyed by title.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::attributes::{AttributeValue, format_attribute_values};
use crate::batch::chunk;
use crate::error::{Result, short_error_message};
use crate::graphql::{GraphQLClient, GraphQLCollection};
use crate::manifest::{DataSiloInput, HeaderInput};
use crate::paginate::{Filters, PageSource, fetch_all};
use crate::runner::run_all_fail_fast;
use crate::sync::{
    KeyFailure, NaturalKey, ProgressCallback, RemoteEntity, RemoteIndex, RemoteRef, SyncOutcome,
    SyncTarget,
};

pub const DATA_SILOS: &str = r#"
query SilosyncDataSilos($first: Int!, $offset: Int!, $filterBy: DataSiloFiltersInput) {
  dataSilos(filterBy: $filterBy, first: $first, offset: $offset) {
    nodes {
      id
      title
      link
      type
    }
    totalCount
  }
}
"#;

pub const DATA_SILO: &str = r#"
query SilosyncDataSilo($id: String!) {
  dataSilo(id: $id) {
    id
    title
    description
    type
    url
    country
    countrySubDivision
    isLive
    identifiers {
      name
      isConnected
    }
    owners {
      email
    }
    teams {
      name
    }
    headers {
      name
      value
      isSecret
    }
    attributeValues {
      attributeKey {
        name
      }
      name
    }
    dependentDataSilos {
      title
    }
  }
}
"#;

pub const CREATE_DATA_SILOS: &str = r#"
mutation SilosyncCreateDataSilos($input: [CreateDataSilosInput!]!) {
  createDataSilos(input: $input) {
    dataSilos {
      id
      title
    }
  }
}
"#;

pub const UPDATE_DATA_SILOS: &str = r#"
mutation SilosyncUpdateDataSilos($input: UpdateDataSilosInput!) {
  updateDataSilos(input: $input) {
    clientMutationId
  }
}
"#;

/// A data silo as listed by the `dataSilos` collection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DataSilo {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(rename = "type", default)]
    pub integration_name: String,
}

impl NaturalKey for DataSilo {
    fn natural_key(&self) -> &str {
        &self.title
    }
}

impl RemoteEntity for DataSilo {
    fn remote_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Deserialize)]
struct CreatedSilo {
    id: String,
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDataSilosData {
    create_data_silos: CreateDataSilosPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDataSilosPayload {
    data_silos: Vec<CreatedSilo>,
}

/// Sync target for data silos.
///
/// Creates go through `createDataSilos`, updates through `updateDataSilos`,
/// one call per batch.
pub struct DataSiloTarget {
    client: GraphQLClient,
    snapshot: GraphQLCollection<DataSilo>,
}

impl DataSiloTarget {
    pub fn new(client: GraphQLClient) -> Self {
        let snapshot = GraphQLCollection::new(client.clone(), "dataSilos", DATA_SILOS);
        Self { client, snapshot }
    }
}

fn create_input(silo: &DataSiloInput) -> serde_json::Value {
    json!({
        "name": silo.integration_name,
        "title": silo.title,
        "country": silo.country,
        "countrySubDivision": silo.country_sub_division,
    })
}

fn update_input(id: &str, silo: &DataSiloInput) -> serde_json::Value {
    let mut input = json!({
        "id": id,
        "title": silo.title,
        "description": silo.description,
        "url": silo.url,
        "country": silo.country,
        "countrySubDivision": silo.country_sub_division,
        "identifiers": silo.identity_keys,
        "isLive": !silo.disabled,
        "ownerEmails": silo.owners,
        "teamNames": silo.teams,
        "headers": silo.headers.iter().map(|h| json!({
            "name": h.name,
            "value": h.value,
            "isSecret": h.is_secret,
        })).collect::<Vec<_>>(),
        "attributes": silo.attributes,
    });
    // Listed dependencies are set once every silo exists.
    if silo.deletion_dependencies.is_none() {
        input["dependedOnDataSiloTitles"] = json!([]);
    }
    input
}

#[async_trait]
impl SyncTarget for DataSiloTarget {
    type Desired = DataSiloInput;
    type Remote = DataSilo;

    fn resource_name(&self) -> &str {
        "data silos"
    }

    fn snapshot(&self) -> &dyn PageSource<DataSilo> {
        &self.snapshot
    }

    async fn create_batch(&self, batch: Vec<DataSiloInput>) -> Result<Vec<RemoteRef>> {
        let input: Vec<_> = batch.iter().map(create_input).collect();
        let data: CreateDataSilosData = self
            .client
            .execute("CreateDataSilos", CREATE_DATA_SILOS, json!({ "input": input }))
            .await?;
        Ok(data
            .create_data_silos
            .data_silos
            .into_iter()
            .map(|silo| RemoteRef::new(silo.id, silo.title))
            .collect())
    }

    async fn update_batch(&self, batch: Vec<(RemoteRef, DataSiloInput)>) -> Result<()> {
        let silos: Vec<_> = batch
            .iter()
            .map(|(remote, silo)| update_input(&remote.id, silo))
            .collect();
        let _: serde_json::Value = self
            .client
            .execute(
                "UpdateDataSilos",
                UPDATE_DATA_SILOS,
                json!({ "input": { "dataSilos": silos } }),
            )
            .await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Identifier {
    name: String,
    #[serde(default)]
    is_connected: bool,
}

#[derive(Debug, Deserialize)]
struct Owner {
    email: String,
}

#[derive(Debug, Deserialize)]
struct Team {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Dependency {
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Header {
    name: String,
    value: String,
    #[serde(default)]
    is_secret: bool,
}

/// Full configuration of one data silo, as needed to write it back out.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataSiloDetail {
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "type")]
    integration_name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_sub_division: Option<String>,
    #[serde(default = "default_is_live")]
    is_live: bool,
    #[serde(default)]
    identifiers: Vec<Identifier>,
    #[serde(default)]
    owners: Vec<Owner>,
    #[serde(default)]
    teams: Vec<Team>,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    attribute_values: Vec<AttributeValue>,
    #[serde(default)]
    dependent_data_silos: Vec<Dependency>,
}

fn default_is_live() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataSiloData {
    data_silo: DataSiloDetail,
}

impl From<DataSiloDetail> for DataSiloInput {
    fn from(detail: DataSiloDetail) -> Self {
        Self {
            title: detail.title,
            integration_name: detail.integration_name,
            description: detail.description.filter(|d| !d.is_empty()),
            url: detail.url,
            country: detail.country,
            country_sub_division: detail.country_sub_division,
            identity_keys: detail
                .identifiers
                .into_iter()
                .filter(|i| i.is_connected)
                .map(|i| i.name)
                .collect(),
            disabled: !detail.is_live,
            owners: detail.owners.into_iter().map(|o| o.email).collect(),
            teams: detail.teams.into_iter().map(|t| t.name).collect(),
            headers: detail
                .headers
                .into_iter()
                .map(|h| HeaderInput {
                    name: h.name,
                    value: h.value,
                    is_secret: h.is_secret,
                })
                .collect(),
            attributes: format_attribute_values(&detail.attribute_values),
            deletion_dependencies: Some(
                detail
                    .dependent_data_silos
                    .into_iter()
                    .map(|d| d.title)
                    .collect::<Vec<_>>(),
            )
            .filter(|titles| !titles.is_empty()),
            datapoints: Vec::new(),
        }
    }
}

/// Fetch data silos (optionally filtered by title text) as manifest entries.
///
/// Silos are listed page by page, then their details are fetched with at
/// most `concurrency` requests in flight. Any failure aborts the pull.
/// Entries are sorted by title.
#[tracing::instrument(skip(client, on_progress))]
pub async fn pull_data_silos(
    client: &GraphQLClient,
    title: Option<&str>,
    page_size: usize,
    concurrency: usize,
    on_progress: Option<&ProgressCallback>,
) -> Result<Vec<DataSiloInput>> {
    let collection: GraphQLCollection<DataSilo> =
        GraphQLCollection::new(client.clone(), "dataSilos", DATA_SILOS);
    let mut filters = Filters::new();
    if let Some(title) = title {
        filters.insert("text".to_string(), json!(title));
    }

    let silos = fetch_all(&collection, &filters, page_size, on_progress).await?;
    tracing::info!(count = silos.len(), "Fetching data silo configurations");

    let detail_client = client.clone();
    let mut pulled = run_all_fail_fast(
        "fetch data silo details",
        silos,
        concurrency,
        |silo| silo.title.clone(),
        move |silo| {
            let client = detail_client.clone();
            async move {
                let data: DataSiloData = client
                    .execute("DataSilo", DATA_SILO, json!({ "id": silo.id }))
                    .await?;
                Ok(DataSiloInput::from(data.data_silo))
            }
        },
        on_progress,
    )
    .await?;

    pulled.sort_by(|a, b| a.title.cmp(&b.title));
    Ok(pulled)
}

/// Point every silo listing `deletion-dependencies` at those silos.
///
/// Run after the silo sync, so a dependency may name a silo created in the
/// same push. Batches of `batch_limit` silos go through `updateDataSilos`
/// one after another; a failed batch fails each of its silos. Silos with
/// no remote id are skipped, as the silo sync already reported them.
#[tracing::instrument(skip_all, fields(silos = silos.len()))]
pub async fn sync_data_silo_dependencies(
    client: &GraphQLClient,
    silos: &[DataSiloInput],
    index: &RemoteIndex,
    batch_limit: usize,
) -> Result<SyncOutcome> {
    let updates: Vec<(&RemoteRef, &Vec<String>)> = silos
        .iter()
        .filter_map(|silo| {
            let titles = silo.deletion_dependencies.as_ref()?;
            index.get(&silo.title).map(|remote| (remote, titles))
        })
        .collect();
    let attempted = updates.len();
    tracing::info!(count = attempted, "Syncing data silo dependencies");

    let mut failures = Vec::new();
    for batch in chunk(updates, batch_limit)? {
        let input: Vec<_> = batch
            .iter()
            .map(|(remote, titles)| {
                json!({ "id": remote.id, "dependedOnDataSiloTitles": titles })
            })
            .collect();
        let result: std::result::Result<serde_json::Value, _> = client
            .execute(
                "UpdateDataSiloDependencies",
                UPDATE_DATA_SILOS,
                json!({ "input": { "dataSilos": input } }),
            )
            .await;
        if let Err(e) = result {
            let message = short_error_message(&e);
            tracing::warn!(count = batch.len(), "Failed to update dependencies: {}", message);
            failures.extend(batch.iter().map(|(remote, _)| KeyFailure {
                key: remote.key.clone(),
                message: message.clone(),
            }));
        }
    }

    Ok(SyncOutcome::from_failures(attempted, failures))
}
