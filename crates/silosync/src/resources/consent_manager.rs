//! The organization's consent manager (airgap bundle).
//!
//! There is at most one per organization. When none exists yet it is
//! created against the organization's deployed privacy center before the
//! domain list is applied.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::Result;
use crate::graphql::GraphQLClient;
use crate::manifest::ConsentManagerInput;
use crate::retry::RetryConfig;

/// Error message the API answers with when no consent manager exists.
const NOT_FOUND_MESSAGE: &str = "AirgapBundle not found";

pub const FETCH_CONSENT_MANAGER_ID: &str = r#"
query SilosyncConsentManagerId {
  consentManager {
    consentManager {
      id
    }
  }
}
"#;

pub const DEPLOYED_PRIVACY_CENTER_URL: &str = r#"
query SilosyncDeployedPrivacyCenterUrl {
  organization {
    deployedPrivacyCenterUrl
  }
}
"#;

pub const FETCH_PRIVACY_CENTER_ID: &str = r#"
query SilosyncPrivacyCenterId($url: String!) {
  privacyCenter(lookup: { url: $url }) {
    id
  }
}
"#;

pub const CREATE_CONSENT_MANAGER: &str = r#"
mutation SilosyncCreateConsentManager($privacyCenterId: ID!) {
  createConsentManager(input: { privacyCenterId: $privacyCenterId }) {
    consentManager {
      id
    }
  }
}
"#;

pub const UPDATE_CONSENT_MANAGER_DOMAINS: &str = r#"
mutation SilosyncUpdateConsentManagerDomains($airgapBundleId: ID!, $domains: [String!]!) {
  updateConsentManagerDomains(input: { id: $airgapBundleId, domains: $domains }) {
    clientMutationId
  }
}
"#;

#[derive(Debug, Deserialize)]
struct Id {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsentManagerPayload {
    consent_manager: Id,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsentManagerData {
    consent_manager: ConsentManagerPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateConsentManagerData {
    create_consent_manager: ConsentManagerPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Organization {
    deployed_privacy_center_url: String,
}

#[derive(Debug, Deserialize)]
struct OrganizationData {
    organization: Organization,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrivacyCenterData {
    privacy_center: Id,
}

/// What [`sync_consent_manager`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentManagerSync {
    /// Airgap bundle id of the consent manager.
    pub id: String,
    /// The consent manager did not exist and was created.
    pub created: bool,
    /// The domain list was written.
    pub domains_updated: bool,
}

/// Look up the consent manager id, `None` when there is none yet.
///
/// The lookup is tried once: a missing consent manager is an answer, not a
/// failure to retry.
async fn fetch_consent_manager_id(client: &GraphQLClient) -> Result<Option<String>> {
    let once = client.clone().with_retry_config(RetryConfig::new(1));
    match once
        .execute::<ConsentManagerData>("ConsentManagerId", FETCH_CONSENT_MANAGER_ID, json!({}))
        .await
    {
        Ok(data) => Ok(Some(data.consent_manager.consent_manager.id)),
        Err(e) if e.inner().to_string().contains(NOT_FOUND_MESSAGE) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn create_consent_manager(client: &GraphQLClient) -> Result<String> {
    let org: OrganizationData = client
        .execute(
            "DeployedPrivacyCenterUrl",
            DEPLOYED_PRIVACY_CENTER_URL,
            json!({}),
        )
        .await?;
    let url = org.organization.deployed_privacy_center_url;
    tracing::info!(privacy_center = %url, "Creating consent manager");

    let center: PrivacyCenterData = client
        .execute(
            "PrivacyCenterId",
            FETCH_PRIVACY_CENTER_ID,
            json!({ "url": url }),
        )
        .await?;
    let created: CreateConsentManagerData = client
        .execute(
            "CreateConsentManager",
            CREATE_CONSENT_MANAGER,
            json!({ "privacyCenterId": center.privacy_center.id }),
        )
        .await?;
    Ok(created.create_consent_manager.consent_manager.id)
}

/// Make sure the consent manager exists and carries the listed domains.
///
/// Without `domains` the existing list is left untouched.
#[tracing::instrument(skip_all)]
pub async fn sync_consent_manager(
    client: &GraphQLClient,
    consent_manager: &ConsentManagerInput,
) -> Result<ConsentManagerSync> {
    let (id, created) = match fetch_consent_manager_id(client).await? {
        Some(id) => (id, false),
        None => (create_consent_manager(client).await?, true),
    };

    let domains_updated = match &consent_manager.domains {
        Some(domains) => {
            let _: Value = client
                .execute(
                    "UpdateConsentManagerDomains",
                    UPDATE_CONSENT_MANAGER_DOMAINS,
                    json!({ "airgapBundleId": id, "domains": domains }),
                )
                .await?;
            tracing::info!(domains = domains.len(), "Updated consent manager domains");
            true
        }
        None => false,
    };

    Ok(ConsentManagerSync {
        id,
        created,
        domains_updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::http::{HttpMethod, HttpResponse, MockTransport};
    use std::sync::Arc;

    const URL: &str = "https://api.example.test/graphql";

    fn ok(body: Value) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: serde_json::to_vec(&body).expect("serialize"),
        }
    }

    fn client(transport: &MockTransport) -> GraphQLClient {
        GraphQLClient::new_with_transport(
            "https://api.example.test",
            "k",
            Arc::new(transport.clone()),
        )
    }

    fn bodies(transport: &MockTransport) -> Vec<Value> {
        transport
            .requests()
            .iter()
            .map(|r| serde_json::from_slice(&r.body).expect("json"))
            .collect()
    }

    fn domains(list: &[&str]) -> ConsentManagerInput {
        ConsentManagerInput {
            domains: Some(list.iter().map(|d| d.to_string()).collect()),
        }
    }

    #[tokio::test]
    async fn existing_consent_manager_gets_domains() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Post,
            URL,
            ok(json!({"data": {"consentManager": {"consentManager": {"id": "cm-1"}}}})),
        );
        transport.push_response(
            HttpMethod::Post,
            URL,
            ok(json!({"data": {"updateConsentManagerDomains": {"clientMutationId": null}}})),
        );

        let result = sync_consent_manager(&client(&transport), &domains(&["acme.com"]))
            .await
            .expect("sync");
        assert_eq!(result.id, "cm-1");
        assert!(!result.created);
        assert!(result.domains_updated);

        let bodies = bodies(&transport);
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[1]["variables"]["airgapBundleId"], "cm-1");
        assert_eq!(bodies[1]["variables"]["domains"], json!(["acme.com"]));
    }

    #[tokio::test]
    async fn missing_consent_manager_is_created_first() {
        let transport = MockTransport::new();
        for body in [
            json!({"errors": [{"message": "AirgapBundle not found"}]}),
            json!({"data": {"organization": {
                "deployedPrivacyCenterUrl": "https://privacy.acme.com"
            }}}),
            json!({"data": {"privacyCenter": {"id": "pc-1"}}}),
            json!({"data": {"createConsentManager": {"consentManager": {"id": "cm-2"}}}}),
            json!({"data": {"updateConsentManagerDomains": {"clientMutationId": null}}}),
        ] {
            transport.push_response(HttpMethod::Post, URL, ok(body));
        }

        let result = sync_consent_manager(&client(&transport), &domains(&["acme.com"]))
            .await
            .expect("sync");
        assert_eq!(
            result,
            ConsentManagerSync {
                id: "cm-2".into(),
                created: true,
                domains_updated: true,
            }
        );

        let bodies = bodies(&transport);
        assert_eq!(bodies.len(), 5);
        assert_eq!(bodies[2]["variables"]["url"], "https://privacy.acme.com");
        assert_eq!(bodies[3]["variables"]["privacyCenterId"], "pc-1");
        assert_eq!(bodies[4]["variables"]["airgapBundleId"], "cm-2");
    }

    #[tokio::test]
    async fn no_domains_leaves_the_list_alone() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Post,
            URL,
            ok(json!({"data": {"consentManager": {"consentManager": {"id": "cm-1"}}}})),
        );

        let result = sync_consent_manager(&client(&transport), &ConsentManagerInput::default())
            .await
            .expect("sync");
        assert!(!result.domains_updated);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn other_lookup_errors_are_not_retried_or_swallowed() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Post,
            URL,
            ok(json!({"errors": [{"message": "Forbidden scope"}]})),
        );

        let err = sync_consent_manager(&client(&transport), &domains(&["acme.com"]))
            .await
            .expect_err("lookup failure");
        assert!(matches!(err, SyncError::Request(_)));
        assert!(err.to_string().contains("Forbidden scope"));
        assert_eq!(transport.requests().len(), 1);
    }
}
