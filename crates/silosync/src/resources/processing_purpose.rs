//! Processing purpose sub-categories, keyed by name.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::Result;
use crate::graphql::{GraphQLClient, GraphQLCollection};
use crate::manifest::ProcessingPurposeInput;
use crate::paginate::PageSource;
use crate::sync::{NaturalKey, RemoteEntity, RemoteRef, SyncTarget};

pub const PROCESSING_PURPOSE_SUB_CATEGORIES: &str = r#"
query SilosyncProcessingPurposeSubCategories($first: Int!, $offset: Int!, $filterBy: ProcessingPurposeSubCategoryFiltersInput) {
  processingPurposeSubCategories(filterBy: $filterBy, first: $first, offset: $offset) {
    nodes {
      id
      name
      purpose
      description
    }
    totalCount
  }
}
"#;

pub const CREATE_PROCESSING_PURPOSE_SUB_CATEGORY: &str = r#"
mutation SilosyncCreateProcessingPurposeSubCategory($input: CreateProcessingPurposeSubCategoryInput!) {
  createProcessingPurposeSubCategory(input: $input) {
    processingPurposeSubCategory {
      id
      name
    }
  }
}
"#;

pub const UPDATE_PROCESSING_PURPOSE_SUB_CATEGORIES: &str = r#"
mutation SilosyncUpdateProcessingPurposeSubCategories($input: [UpdateProcessingPurposeSubCategoryInput!]!) {
  updateProcessingPurposeSubCategories(input: $input) {
    clientMutationId
  }
}
"#;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessingPurpose {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl NaturalKey for ProcessingPurpose {
    fn natural_key(&self) -> &str {
        &self.name
    }
}

impl RemoteEntity for ProcessingPurpose {
    fn remote_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateData {
    create_processing_purpose_sub_category: CreatePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePayload {
    processing_purpose_sub_category: ProcessingPurpose,
}

/// Sync target for processing purposes.
///
/// The API has no batch create, so a create batch is issued one entry at a
/// time, in order. Updates are batched.
pub struct ProcessingPurposeTarget {
    client: GraphQLClient,
    snapshot: GraphQLCollection<ProcessingPurpose>,
}

impl ProcessingPurposeTarget {
    pub fn new(client: GraphQLClient) -> Self {
        let snapshot = GraphQLCollection::new(
            client.clone(),
            "processingPurposeSubCategories",
            PROCESSING_PURPOSE_SUB_CATEGORIES,
        );
        Self { client, snapshot }
    }
}

#[async_trait]
impl SyncTarget for ProcessingPurposeTarget {
    type Desired = ProcessingPurposeInput;
    type Remote = ProcessingPurpose;

    fn resource_name(&self) -> &str {
        "processing purposes"
    }

    fn snapshot(&self) -> &dyn PageSource<ProcessingPurpose> {
        &self.snapshot
    }

    async fn create_batch(&self, batch: Vec<ProcessingPurposeInput>) -> Result<Vec<RemoteRef>> {
        let mut created = Vec::with_capacity(batch.len());
        for purpose in &batch {
            let data: CreateData = self
                .client
                .execute(
                    "CreateProcessingPurposeSubCategory",
                    CREATE_PROCESSING_PURPOSE_SUB_CATEGORY,
                    json!({
                        "input": {
                            "name": purpose.name,
                            "purpose": purpose.purpose,
                            "description": purpose.description,
                        }
                    }),
                )
                .await?;
            let remote = data
                .create_processing_purpose_sub_category
                .processing_purpose_sub_category;
            tracing::debug!(name = %remote.name, id = %remote.id, "Created processing purpose");
            created.push(RemoteRef::of(&remote));
        }
        Ok(created)
    }

    async fn update_batch(&self, batch: Vec<(RemoteRef, ProcessingPurposeInput)>) -> Result<()> {
        let input: Vec<_> = batch
            .iter()
            .map(|(remote, purpose)| {
                json!({
                    "id": remote.id,
                    "name": purpose.name,
                    "purpose": purpose.purpose,
                    "description": purpose.description,
                    "attributes": purpose.attributes,
                })
            })
            .collect();
        let _: serde_json::Value = self
            .client
            .execute(
                "UpdateProcessingPurposeSubCategories",
                UPDATE_PROCESSING_PURPOSE_SUB_CATEGORIES,
                json!({ "input": input }),
            )
            .await?;
        Ok(())
    }
}
