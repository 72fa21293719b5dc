//! External checker abstraction
//!
//! The checker runs a resource type's check script against a source and
//! reports the versions it found. Everything it needs travels in the
//! `CheckRequest`; no process-wide state is consulted.

use crate::resource::{ResourceTypes, Source, Version};
use crate::session::SessionOwner;
use async_trait::async_trait;
use thiserror::Error;

/// Inputs to one check
#[derive(Debug, Clone, PartialEq)]
pub struct CheckRequest {
    /// Type implementing the check (built-in or custom)
    pub type_name: String,
    pub source: Source,
    /// Last known version; `None` asks for the latest only
    pub from_version: Option<Version>,
    /// Custom types the check container may be built from
    pub resource_types: ResourceTypes,
    pub team_id: i64,
    pub owner: SessionOwner,
}

/// How a check can fail
#[derive(Error, Debug)]
pub enum CheckError {
    /// The check script ran and exited non-zero
    #[error("check script exited with status {exit_status}: {stderr}")]
    ScriptFailed { exit_status: i32, stderr: String },

    /// The check could not be run at all
    #[error("check execution failed: {0}")]
    Execution(String),
}

/// Runs checks
#[async_trait]
pub trait Checker: Send + Sync {
    /// Versions newer than (and possibly including) `from_version`, oldest first
    async fn check(&self, request: &CheckRequest) -> Result<Vec<Version>, CheckError>;
}
