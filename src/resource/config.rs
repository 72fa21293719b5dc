//! Resource configurations and caches, before and after persistence
//!
//! `ResourceConfig` and `ResourceCache` are values: structurally equal values
//! describe the same thing. Their `Used*` counterparts carry the ids assigned
//! by the store and are never mutated once returned.

use crate::resource::source::{Source, Version};
use serde::Serialize;
use std::fmt;

/// What produces a resource configuration's checker
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigOrigin {
    /// A checker built into the workers
    BaseResourceType(String),
    /// A custom type, implemented by a checked version of another resource
    ResourceCache(Box<ResourceCache>),
}

/// How to check a resource: its type ancestry plus its source
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceConfig {
    pub origin: ConfigOrigin,
    pub source: Source,
}

impl ResourceConfig {
    pub fn base(type_name: impl Into<String>, source: Source) -> Self {
        Self {
            origin: ConfigOrigin::BaseResourceType(type_name.into()),
            source,
        }
    }

    pub fn custom(parent: ResourceCache, source: Source) -> Self {
        Self {
            origin: ConfigOrigin::ResourceCache(Box::new(parent)),
            source,
        }
    }

    pub fn source_hash(&self) -> String {
        self.source.hash()
    }

    /// The built-in type at the root of the ancestry
    pub fn base_resource_type(&self) -> &str {
        match &self.origin {
            ConfigOrigin::BaseResourceType(name) => name,
            ConfigOrigin::ResourceCache(cache) => cache.resource_config.base_resource_type(),
        }
    }

    /// Number of custom types between this config and its base type
    pub fn depth(&self) -> usize {
        match &self.origin {
            ConfigOrigin::BaseResourceType(_) => 0,
            ConfigOrigin::ResourceCache(cache) => 1 + cache.resource_config.depth(),
        }
    }
}

/// One checked version of a resource configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceCache {
    pub resource_config: ResourceConfig,
    pub version: Version,
    pub params: Source,
}

impl ResourceCache {
    pub fn new(resource_config: ResourceConfig, version: Version) -> Self {
        Self {
            resource_config,
            version,
            params: Source::new(),
        }
    }

    pub fn with_params(mut self, params: Source) -> Self {
        self.params = params;
        self
    }

    pub fn params_hash(&self) -> String {
        self.params.hash()
    }
}

/// Persisted base resource type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsedBaseResourceType {
    pub id: i64,
    pub name: String,
}

/// Persisted origin of a resource configuration
#[derive(Debug, Clone, PartialEq)]
pub enum UsedConfigOrigin {
    BaseResourceType(UsedBaseResourceType),
    ResourceCache(Box<UsedResourceCache>),
}

/// Persisted, identity-assigned resource configuration
#[derive(Debug, Clone, PartialEq)]
pub struct UsedResourceConfig {
    pub id: i64,
    pub origin: UsedConfigOrigin,
    pub source_hash: String,
}

/// Persisted resource cache
#[derive(Debug, Clone, PartialEq)]
pub struct UsedResourceCache {
    pub id: i64,
    pub resource_config: UsedResourceConfig,
    pub version: Version,
    pub params_hash: String,
}

/// A live entity relying on a config or cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum ResourceUser {
    Build(i64),
    Resource(i64),
    ResourceType(i64),
}

impl ResourceUser {
    /// Identifier pair for logs and audit records, e.g. `("build_id", 3)`
    pub fn audit_field(&self) -> (&'static str, i64) {
        match self {
            Self::Build(id) => ("build_id", *id),
            Self::Resource(id) => ("resource_id", *id),
            Self::ResourceType(id) => ("resource_type_id", *id),
        }
    }
}

impl fmt::Display for ResourceUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build(id) => write!(f, "build {}", id),
            Self::Resource(id) => write!(f, "resource {}", id),
            Self::ResourceType(id) => write!(f, "resource type {}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_source() -> Source {
        Source::new().with("uri", "https://example.com/repo.git")
    }

    #[test]
    fn base_resource_type_walks_ancestry() {
        let image = ResourceConfig::base("registry-image", Source::new().with("repository", "x"));
        let parent = ResourceCache::new(image, Version::from_pairs([("digest", "sha256:1")]));
        let config = ResourceConfig::custom(parent, git_source());

        assert_eq!(config.base_resource_type(), "registry-image");
        assert_eq!(config.depth(), 1);
    }

    #[test]
    fn structural_equality() {
        assert_eq!(
            ResourceConfig::base("git", git_source()),
            ResourceConfig::base("git", git_source())
        );
        assert_ne!(
            ResourceConfig::base("git", git_source()),
            ResourceConfig::base("hg", git_source())
        );
    }

    #[test]
    fn user_display_and_audit_field() {
        assert_eq!(ResourceUser::Build(3).to_string(), "build 3");
        assert_eq!(
            ResourceUser::ResourceType(9).audit_field(),
            ("resource_type_id", 9)
        );
        let json = serde_json::to_value(ResourceUser::Resource(4)).unwrap();
        assert_eq!(json["kind"], "resource");
        assert_eq!(json["id"], 4);
    }
}
