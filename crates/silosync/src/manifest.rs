//! Desired-state manifest: the YAML files `push` reads and `pull` writes.
//!
//! ```yaml
//! data-silos:
//!   - title: Salesforce
//!     integration-name: salesforce
//!     url: https://<<parameters.domain>>/webhook
//! processing-purposes:
//!   - name: Marketing emails
//!     purpose: MARKETING
//! enrichers:
//!   - title: Basic identity enricher
//!     url: https://example.com/enrich
//!     input-identifier: email
//!     output-identifiers: [phone]
//! consent-manager:
//!   domains: [acme.com, www.acme.com]
//! ```
//!
//! `<<parameters.NAME>>` placeholders are substituted from a `NAME:value`
//! list before the YAML is parsed. Other top-level keys are ignored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::NaturalKey;

const PARAMETER_OPEN: &str = "<<parameters.";
const PARAMETER_CLOSE: &str = ">>";

/// Errors that can occur loading or writing a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("Unresolved parameter \"{name}\"; pass it with --variables {name}:<value>")]
    UnresolvedParameter { name: String },

    #[error("Invalid variable \"{entry}\"; expected NAME:value")]
    InvalidVariable { entry: String },

    #[error("Failed to serialize manifest: {0}")]
    Serialize(#[source] serde_yaml_ng::Error),
}

/// Values substituted for `<<parameters.NAME>>`.
pub type Variables = BTreeMap<String, String>;

/// Attribute key with its values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeInput {
    pub key: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Custom header sent by the remote integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HeaderInput {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub is_secret: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DataSiloInput {
    pub title: String,
    pub integration_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_sub_division: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identity_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owners: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teams: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderInput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<AttributeInput>,
    /// Titles of silos that must finish erasure before this one.
    /// Absent clears the dependencies on push.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_dependencies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datapoints: Vec<DatapointInput>,
}

impl NaturalKey for DataSiloInput {
    fn natural_key(&self) -> &str {
        &self.title
    }
}

/// A datapoint (table, object, endpoint) inside a data silo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DatapointInput {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_collection_tag: Option<String>,
    /// Suggested query per request action, e.g. `ACCESS: SELECT ...`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_action_queries: Option<BTreeMap<String, String>>,
    /// Enabled request actions; absent disables them all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_actions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldInput>>,
}

/// A field (column, property) of a datapoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FieldInput {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<FieldCategoryInput>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purposes: Option<Vec<FieldPurposeInput>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<AttributeInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_request_visibility_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub erasure_request_redaction_enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCategoryInput {
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPurposeInput {
    pub purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The organization's consent manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConsentManagerInput {
    /// Domains the consent manager is deployed on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domains: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProcessingPurposeInput {
    pub name: String,
    pub purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<AttributeInput>,
}

impl NaturalKey for ProcessingPurposeInput {
    fn natural_key(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EnricherInput {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_identifier: Option<String>,
    #[serde(default)]
    pub output_identifiers: Vec<String>,
    /// Request actions the enricher runs for; all actions when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_actions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderInput>,
}

impl NaturalKey for EnricherInput {
    fn natural_key(&self) -> &str {
        &self.title
    }
}

/// Parsed manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_silos: Vec<DataSiloInput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processing_purposes: Vec<ProcessingPurposeInput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enrichers: Vec<EnricherInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_manager: Option<ConsentManagerInput>,
}

impl Manifest {
    /// Append every list of `other` to this manifest. A consent manager in
    /// `other` replaces this one.
    pub fn merge(&mut self, other: Manifest) {
        self.data_silos.extend(other.data_silos);
        self.processing_purposes.extend(other.processing_purposes);
        self.enrichers.extend(other.enrichers);
        if other.consent_manager.is_some() {
            self.consent_manager = other.consent_manager;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data_silos.is_empty()
            && self.processing_purposes.is_empty()
            && self.enrichers.is_empty()
            && self.consent_manager.is_none()
    }
}

/// Split a comma-separated value, trimming entries and dropping empties.
pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a `NAME:value,NAME2:value2` list.
///
/// Everything after the first `:` belongs to the value.
pub fn parse_variables(list: &str) -> Result<Variables, ManifestError> {
    split_csv(list)
        .into_iter()
        .map(|entry| match entry.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), value.to_string()))
            }
            _ => Err(ManifestError::InvalidVariable { entry }),
        })
        .collect()
}

/// Replace every `<<parameters.NAME>>` in `text`.
pub fn substitute_parameters(text: &str, variables: &Variables) -> Result<String, ManifestError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(PARAMETER_OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + PARAMETER_OPEN.len()..];
        let Some(end) = after.find(PARAMETER_CLOSE) else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };

        let name = after[..end].trim();
        let value = variables
            .get(name)
            .ok_or_else(|| ManifestError::UnresolvedParameter {
                name: name.to_string(),
            })?;
        out.push_str(value);
        rest = &after[end + PARAMETER_CLOSE.len()..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Parse manifest text after parameter substitution.
pub fn parse_manifest(
    origin: &str,
    text: &str,
    variables: &Variables,
) -> Result<Manifest, ManifestError> {
    let text = substitute_parameters(text, variables)?;
    if text.trim().is_empty() {
        return Ok(Manifest::default());
    }
    serde_yaml_ng::from_str(&text).map_err(|source| ManifestError::Parse {
        origin: origin.to_string(),
        source,
    })
}

/// Read and parse one manifest file.
pub fn load_manifest(path: &Path, variables: &Variables) -> Result<Manifest, ManifestError> {
    let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest = parse_manifest(&path.display().to_string(), &text, variables)?;
    tracing::debug!(
        path = %path.display(),
        data_silos = manifest.data_silos.len(),
        processing_purposes = manifest.processing_purposes.len(),
        enrichers = manifest.enrichers.len(),
        consent_manager = manifest.consent_manager.is_some(),
        "Loaded manifest"
    );
    Ok(manifest)
}

/// Read every file and merge them, lists concatenated in file order.
pub fn load_manifests<P: AsRef<Path>>(
    paths: &[P],
    variables: &Variables,
) -> Result<Manifest, ManifestError> {
    let mut merged = Manifest::default();
    for path in paths {
        merged.merge(load_manifest(path.as_ref(), variables)?);
    }
    Ok(merged)
}

/// Serialize a manifest to YAML and write it to `path`.
pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<(), ManifestError> {
    let text = serde_yaml_ng::to_string(manifest).map_err(ManifestError::Serialize)?;
    std::fs::write(path, text).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })
}
