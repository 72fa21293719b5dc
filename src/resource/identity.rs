//! Identity resolution for resource configurations
//!
//! Walks a type name through the pipeline's custom resource types until it
//! reaches a built-in type, then folds the walk back into a nested
//! `ResourceConfig`. A custom type never resolves through itself, so a custom
//! `git` of type `git` sits on top of the built-in `git`. Reaching a custom type
//! seen earlier in the walk is reported as `CyclicResourceType` instead of
//! recursing.

use crate::error::{RadarError, RadarResult};
use crate::resource::config::{ResourceCache, ResourceConfig};
use crate::resource::source::Source;
use crate::resource::types::{ResourceTypeDef, ResourceTypes};
use std::collections::HashSet;

/// Custom types from `type_name` outward, nearest first
fn ancestry<'a>(
    type_name: &'a str,
    types: &'a ResourceTypes,
) -> RadarResult<Vec<&'a ResourceTypeDef>> {
    let mut chain: Vec<&ResourceTypeDef> = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut current = type_name;

    loop {
        // A type naming itself refers to the built-in it overrides
        let previous = chain.last().map(|t| t.name.as_str());
        let Some(custom) = types.lookup(current).filter(|t| Some(t.name.as_str()) != previous)
        else {
            break;
        };
        if !visited.insert(custom.name.as_str()) {
            let mut names: Vec<&str> = vec![type_name];
            names.extend(chain.iter().map(|t| t.type_name.as_str()));
            return Err(RadarError::CyclicResourceType {
                chain: names.join(" -> "),
            });
        }
        chain.push(custom);
        current = custom.type_name.as_str();
    }

    Ok(chain)
}

/// Resolve the configuration identity of `type_name` with `source`.
///
/// Fails with `ResourceTypeUnversioned` if a custom type in the ancestry has
/// not been checked yet; its version is part of the identity.
pub fn resolve(
    type_name: &str,
    source: &Source,
    types: &ResourceTypes,
) -> RadarResult<ResourceConfig> {
    let chain = ancestry(type_name, types)?;
    let base = chain
        .last()
        .map(|t| t.type_name.as_str())
        .unwrap_or(type_name);

    let mut parent: Option<ResourceCache> = None;
    for custom in chain.iter().rev() {
        let custom_config = match parent.take() {
            None => ResourceConfig::base(base, custom.source.clone()),
            Some(cache) => ResourceConfig::custom(cache, custom.source.clone()),
        };
        let version = custom
            .version
            .clone()
            .ok_or_else(|| RadarError::ResourceTypeUnversioned(custom.name.clone()))?;
        parent = Some(ResourceCache::new(custom_config, version));
    }

    Ok(match parent {
        None => ResourceConfig::base(type_name, source.clone()),
        Some(cache) => ResourceConfig::custom(cache, source.clone()),
    })
}

/// The custom types `type_name` is built on, deepest ancestor first.
///
/// This is the order checks must run in: each entry only depends on entries
/// before it.
pub fn dependency_chain(
    type_name: &str,
    types: &ResourceTypes,
) -> RadarResult<Vec<ResourceTypeDef>> {
    let chain = ancestry(type_name, types)?;
    Ok(chain.into_iter().rev().cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::config::ConfigOrigin;
    use crate::resource::source::Version;

    fn v(r: &str) -> Version {
        Version::from_pairs([("ref", r)])
    }

    fn src(k: &str) -> Source {
        Source::new().with("key", k)
    }

    #[test]
    fn base_type_when_not_custom() {
        let config = resolve("git", &src("repo"), &ResourceTypes::default()).unwrap();
        assert_eq!(config, ResourceConfig::base("git", src("repo")));
    }

    #[test]
    fn custom_type_wraps_parent_cache() {
        let types = ResourceTypes::new(vec![
            ResourceTypeDef::new("slack", "registry-image", src("slack-image"))
                .with_version(v("1")),
        ]);

        let config = resolve("slack", &src("webhook"), &types).unwrap();

        let ConfigOrigin::ResourceCache(parent) = &config.origin else {
            panic!("expected custom origin");
        };
        assert_eq!(
            parent.resource_config,
            ResourceConfig::base("registry-image", src("slack-image"))
        );
        assert_eq!(parent.version, v("1"));
        assert_eq!(config.source, src("webhook"));
    }

    #[test]
    fn nested_custom_types() {
        let types = ResourceTypes::new(vec![
            ResourceTypeDef::new("a", "b", src("a")).with_version(v("a1")),
            ResourceTypeDef::new("b", "c", src("b")).with_version(v("b1")),
        ]);

        let config = resolve("a", &src("leaf"), &types).unwrap();
        assert_eq!(config.depth(), 2);
        assert_eq!(config.base_resource_type(), "c");
    }

    #[test]
    fn resolution_is_deterministic() {
        let types = ResourceTypes::new(vec![
            ResourceTypeDef::new("a", "b", src("a")).with_version(v("a1")),
        ]);
        let first = resolve("a", &src("leaf"), &types).unwrap();
        let second = resolve("a", &src("leaf"), &types).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.source_hash(), second.source_hash());
    }

    #[test]
    fn unversioned_ancestor_is_named() {
        let types = ResourceTypes::new(vec![
            ResourceTypeDef::new("a", "b", src("a")).with_version(v("a1")),
            ResourceTypeDef::new("b", "c", src("b")),
        ]);

        let err = resolve("a", &src("leaf"), &types).unwrap_err();
        assert!(matches!(err, RadarError::ResourceTypeUnversioned(name) if name == "b"));
    }

    #[test]
    fn cycle_is_rejected() {
        let types = ResourceTypes::new(vec![
            ResourceTypeDef::new("a", "b", src("a")).with_version(v("a1")),
            ResourceTypeDef::new("b", "a", src("b")).with_version(v("b1")),
        ]);

        let err = resolve("a", &src("leaf"), &types).unwrap_err();
        match err {
            RadarError::CyclicResourceType { chain } => assert_eq!(chain, "a -> b -> a"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn custom_type_overrides_builtin_of_same_name() {
        let types = ResourceTypes::new(vec![
            ResourceTypeDef::new("git", "git", src("git-image")).with_version(v("d1")),
        ]);

        let config = resolve("git", &src("repo"), &types).unwrap();

        assert_eq!(config.depth(), 1);
        assert_eq!(config.base_resource_type(), "git");
        let ConfigOrigin::ResourceCache(parent) = &config.origin else {
            panic!("expected custom origin");
        };
        assert_eq!(parent.resource_config, ResourceConfig::base("git", src("git-image")));
        assert_eq!(parent.version, v("d1"));

        let chain = dependency_chain("git", &types).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].name, "git");
    }

    #[test]
    fn override_nested_under_another_custom_type() {
        let types = ResourceTypes::new(vec![
            ResourceTypeDef::new("a", "b", src("a")).with_version(v("a1")),
            ResourceTypeDef::new("b", "b", src("b")).with_version(v("b1")),
        ]);

        let config = resolve("a", &src("leaf"), &types).unwrap();
        assert_eq!(config.depth(), 2);
        assert_eq!(config.base_resource_type(), "b");
    }

    #[test]
    fn dependency_chain_deepest_first() {
        let types = ResourceTypes::new(vec![
            ResourceTypeDef::new("a", "b", src("a")),
            ResourceTypeDef::new("b", "c", src("b")),
            ResourceTypeDef::new("unrelated", "git", src("u")),
        ]);

        let chain = dependency_chain("a", &types).unwrap();
        let names: Vec<&str> = chain.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);

        assert!(dependency_chain("git", &types).unwrap().is_empty());
    }
}
