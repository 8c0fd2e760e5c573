use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::RepairError;

/// A CloudFormation template, parsed just deeply enough to walk its
/// resources. Top-level keys other than `Resources` (description, outputs,
/// parameters) round-trip untouched through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "Resources", default)]
    pub resources: BTreeMap<String, Resource>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One declared resource. Property values stay dynamic (`serde_yaml::Value`)
/// because the resolver has to tell a plain string apart from a `{Ref: ...}`
/// mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(
        rename = "DeletionPolicy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub deletion_policy: Option<String>,

    #[serde(rename = "Properties", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Template {
    /// Parse a template from its on-disk YAML form.
    pub fn parse(data: &[u8]) -> Result<Self, RepairError> {
        Ok(serde_yaml::from_slice(data)?)
    }

    /// Serialize back to YAML. Mapping key order is not preserved; content is.
    pub fn to_yaml(&self) -> Result<String, RepairError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

impl Resource {
    /// A property declared as a plain string, e.g. `RoleName: my-role`.
    pub fn string_property(&self, name: &str) -> Option<&str> {
        match self.properties.get(name) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// A property declared as a single-key `{Ref: <logical-name>}` mapping.
    /// Returns the referenced logical name.
    pub fn ref_property(&self, name: &str) -> Option<&str> {
        match self.properties.get(name) {
            Some(Value::Mapping(m)) if m.len() == 1 => {
                let (key, value) = m.iter().next()?;
                if key.as_str() == Some("Ref") {
                    value.as_str()
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}
