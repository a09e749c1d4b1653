use serde::{Deserialize, Serialize};

use crate::manifest::AttributeInput;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeKey {
    pub name: String,
}

/// One attribute value as the API returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeValue {
    pub attribute_key: AttributeKey,
    pub name: String,
}

/// Group attribute values by key, keeping the order keys are first seen.
pub fn format_attribute_values(values: &[AttributeValue]) -> Vec<AttributeInput> {
    let mut attributes: Vec<AttributeInput> = Vec::new();
    for value in values {
        match attributes
            .iter_mut()
            .find(|a| a.key == value.attribute_key.name)
        {
            Some(existing) => existing.values.push(value.name.clone()),
            None => attributes.push(AttributeInput {
                key: value.attribute_key.name.clone(),
                values: vec![value.name.clone()],
            }),
        }
    }
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(key: &str, name: &str) -> AttributeValue {
        AttributeValue {
            attribute_key: AttributeKey {
                name: key.to_string(),
            },
            name: name.to_string(),
        }
    }

    #[test]
    fn groups_by_key_in_first_seen_order() {
        let formatted = format_attribute_values(&[
            value("Region", "EU"),
            value("Tier", "Gold"),
            value("Region", "US"),
        ]);
        assert_eq!(
            formatted,
            vec![
                AttributeInput {
                    key: "Region".into(),
                    values: vec!["EU".into(), "US".into()],
                },
                AttributeInput {
                    key: "Tier".into(),
                    values: vec!["Gold".into()],
                },
            ]
        );
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(format_attribute_values(&[]).is_empty());
    }

    #[test]
    fn decodes_api_shape() {
        let parsed: AttributeValue =
            serde_json::from_str(r#"{"attributeKey": {"name": "Region"}, "name": "EU"}"#)
                .expect("decode");
        assert_eq!(parsed, value("Region", "EU"));
    }
}
