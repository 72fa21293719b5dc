//! Resource data model
//!
//! A resource configuration is content-addressed: its identity is the built-in
//! type at the root of its custom-type ancestry, the checked version of every
//! custom type along the way, and the hash of its own source.
//!
//! ```text
//! leaf config ──> cache(custom type "a", version) ──> config("a" source)
//!                                                        └──> cache("b", version) ──> config("b" source) ──> base type
//! ```

pub mod config;
pub mod identity;
pub mod source;
pub mod types;

pub use config::{
    ConfigOrigin, ResourceCache, ResourceConfig, ResourceUser, UsedBaseResourceType,
    UsedConfigOrigin, UsedResourceCache, UsedResourceConfig,
};
pub use identity::{dependency_chain, resolve};
pub use source::{MetadataField, Source, Version};
pub use types::{ResourceTypeDef, ResourceTypes};
