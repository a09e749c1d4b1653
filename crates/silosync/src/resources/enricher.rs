//! Enrichers, keyed by title.
//!
//! Enricher inputs reference identifiers by name; the API wants ids, so the
//! target is built with the organization's identifier index.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::{Result, SyncError};
use crate::graphql::{GraphQLClient, GraphQLCollection};
use crate::manifest::EnricherInput;
use crate::paginate::{Filters, PageSource, fetch_all};
use crate::sync::{NaturalKey, ProgressCallback, RemoteEntity, RemoteRef, SyncTarget};

/// Request actions an enricher runs for when the manifest lists none.
pub const ALL_REQUEST_ACTIONS: &[&str] = &[
    "ACCESS",
    "ERASURE",
    "RECTIFICATION",
    "RESTRICTION",
    "SALE_OPT_OUT",
    "SALE_OPT_IN",
    "TRACKING_OPT_OUT",
    "TRACKING_OPT_IN",
    "CONTACT_OPT_OUT",
    "CONTACT_OPT_IN",
    "AUTOMATED_DECISION_MAKING_OPT_OUT",
    "USE_OF_SENSITIVE_INFORMATION_OPT_OUT",
    "CUSTOM_OPT_OUT",
    "BUSINESS_PURPOSE",
];

pub const ENRICHERS: &str = r#"
query SilosyncEnrichers($first: Int!, $offset: Int!, $filterBy: EnricherFiltersInput) {
  enrichers(filterBy: $filterBy, first: $first, offset: $offset) {
    nodes {
      id
      title
      url
      type
      actions
    }
    totalCount
  }
}
"#;

pub const IDENTIFIERS: &str = r#"
query SilosyncIdentifiers($first: Int!, $offset: Int!, $filterBy: IdentifierFiltersInput) {
  identifiers(filterBy: $filterBy, first: $first, offset: $offset) {
    nodes {
      id
      name
    }
    totalCount
  }
}
"#;

pub const CREATE_ENRICHER: &str = r#"
mutation SilosyncCreateEnricher($input: CreateEnricherInput!) {
  createEnricher(input: $input) {
    enricher {
      id
      title
    }
  }
}
"#;

pub const UPDATE_ENRICHER: &str = r#"
mutation SilosyncUpdateEnricher($input: UpdateEnricherInput!) {
  updateEnricher(input: $input) {
    clientMutationId
  }
}
"#;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Enricher {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub actions: Vec<String>,
}

impl NaturalKey for Enricher {
    fn natural_key(&self) -> &str {
        &self.title
    }
}

impl RemoteEntity for Enricher {
    fn remote_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Identifier {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEnricherData {
    create_enricher: CreateEnricherPayload,
}

#[derive(Debug, Deserialize)]
struct CreateEnricherPayload {
    enricher: Enricher,
}

/// Sync target for enrichers. Creates and updates are one call per entry.
pub struct EnricherTarget {
    client: GraphQLClient,
    snapshot: GraphQLCollection<Enricher>,
    identifier_ids: BTreeMap<String, String>,
}

impl EnricherTarget {
    /// Build a target with a known identifier index (name -> id).
    pub fn new(client: GraphQLClient, identifier_ids: BTreeMap<String, String>) -> Self {
        let snapshot = GraphQLCollection::new(client.clone(), "enrichers", ENRICHERS);
        Self {
            client,
            snapshot,
            identifier_ids,
        }
    }

    /// Build a target, fetching the identifier index first.
    pub async fn load(
        client: GraphQLClient,
        page_size: usize,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<Self> {
        let collection: GraphQLCollection<Identifier> =
            GraphQLCollection::new(client.clone(), "identifiers", IDENTIFIERS);
        let identifiers = fetch_all(&collection, &Filters::new(), page_size, on_progress).await?;
        let identifier_ids = identifiers
            .into_iter()
            .map(|identifier| (identifier.name, identifier.id))
            .collect();
        Ok(Self::new(client, identifier_ids))
    }

    fn identifier_id(&self, enricher: &str, name: &str) -> Result<&str> {
        self.identifier_ids
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| {
                SyncError::validation(format!(
                    "enricher \"{}\" references unknown identifier \"{}\"",
                    enricher, name
                ))
            })
    }

    /// Fields shared by create and update.
    fn input(&self, enricher: &EnricherInput) -> Result<Map<String, Value>> {
        let identifiers = enricher
            .output_identifiers
            .iter()
            .map(|name| self.identifier_id(&enricher.title, name))
            .collect::<Result<Vec<_>>>()?;
        let input_identifier = enricher
            .input_identifier
            .as_deref()
            .map(|name| self.identifier_id(&enricher.title, name))
            .transpose()?;
        let actions: Vec<&str> = match &enricher.privacy_actions {
            Some(actions) => actions.iter().map(String::as_str).collect(),
            None => ALL_REQUEST_ACTIONS.to_vec(),
        };

        let mut input = Map::new();
        input.insert("title".into(), json!(enricher.title));
        input.insert("url".into(), json!(enricher.url));
        input.insert(
            "description".into(),
            json!(enricher.description.as_deref().unwrap_or_default()),
        );
        input.insert(
            "headers".into(),
            json!(
                enricher
                    .headers
                    .iter()
                    .map(|h| json!({"name": h.name, "value": h.value, "isSecret": h.is_secret}))
                    .collect::<Vec<_>>()
            ),
        );
        input.insert("identifiers".into(), json!(identifiers));
        input.insert("actions".into(), json!(actions));
        if let Some(id) = input_identifier {
            input.insert("inputIdentifier".into(), json!(id));
        }
        Ok(input)
    }
}

#[async_trait]
impl SyncTarget for EnricherTarget {
    type Desired = EnricherInput;
    type Remote = Enricher;

    fn resource_name(&self) -> &str {
        "enrichers"
    }

    fn snapshot(&self) -> &dyn PageSource<Enricher> {
        &self.snapshot
    }

    fn validate(&self, desired: &[EnricherInput]) -> Result<()> {
        for enricher in desired {
            for name in enricher
                .output_identifiers
                .iter()
                .chain(enricher.input_identifier.as_ref())
            {
                self.identifier_id(&enricher.title, name)?;
            }
        }
        Ok(())
    }

    async fn create_batch(&self, batch: Vec<EnricherInput>) -> Result<Vec<RemoteRef>> {
        let mut created = Vec::with_capacity(batch.len());
        for enricher in &batch {
            if enricher.input_identifier.is_none() {
                tracing::warn!(
                    enricher = %enricher.title,
                    "Skipping new enricher without an input-identifier"
                );
                continue;
            }
            let input = self.input(enricher)?;
            let data: CreateEnricherData = self
                .client
                .execute("CreateEnricher", CREATE_ENRICHER, json!({ "input": input }))
                .await?;
            created.push(RemoteRef::of(&data.create_enricher.enricher));
        }
        Ok(created)
    }

    async fn update_batch(&self, batch: Vec<(RemoteRef, EnricherInput)>) -> Result<()> {
        for (remote, enricher) in &batch {
            let mut input = self.input(enricher)?;
            input.insert("id".into(), json!(remote.id));
            let _: Value = self
                .client
                .execute("UpdateEnricher", UPDATE_ENRICHER, json!({ "input": input }))
                .await?;
        }
        Ok(())
    }
}
