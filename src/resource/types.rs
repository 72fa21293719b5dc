//! Custom resource type definitions available to a pipeline

use crate::resource::source::{Source, Version};
use serde::{Deserialize, Serialize};

/// A custom resource type together with its currently pinned version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTypeDef {
    /// Name resources refer to in their `type`
    pub name: String,

    /// The type this custom type is itself implemented by
    #[serde(rename = "type")]
    pub type_name: String,

    /// Source used to check and fetch the type's implementation
    #[serde(default)]
    pub source: Source,

    /// Latest checked version, if any check has succeeded yet
    #[serde(default)]
    pub version: Option<Version>,
}

impl ResourceTypeDef {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, source: Source) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            source,
            version: None,
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }
}

/// The set of custom types a resolution may draw on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceTypes(Vec<ResourceTypeDef>);

impl ResourceTypes {
    pub fn new(types: Vec<ResourceTypeDef>) -> Self {
        Self(types)
    }

    pub fn lookup(&self, name: &str) -> Option<&ResourceTypeDef> {
        self.0.iter().find(|t| t.name == name)
    }

    /// Copy of the set with the named type removed
    pub fn without(&self, name: &str) -> Self {
        Self(self.0.iter().filter(|t| t.name != name).cloned().collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceTypeDef> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ResourceTypeDef> for ResourceTypes {
    fn from_iter<I: IntoIterator<Item = ResourceTypeDef>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
