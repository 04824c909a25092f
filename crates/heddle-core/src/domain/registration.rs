//! Administrative metadata: domains, workflow/activity types and event streams.
//!
//! Registrations are declarative; the migrator applies them idempotently.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRegistration {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub retention_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTypeRegistration {
    pub domain: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_task_list: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityTypeRegistration {
    pub domain: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Auxiliary event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRegistration {
    pub name: String,
    pub shard_count: u32,
}

/// Reference to a registered workflow or activity type (for deprecation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeRef {
    pub domain: String,
    pub name: String,
    pub version: String,
}

impl TypeRef {
    pub fn new(domain: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

impl From<&WorkflowTypeRegistration> for TypeRef {
    fn from(r: &WorkflowTypeRegistration) -> Self {
        TypeRef::new(&r.domain, &r.name, &r.version)
    }
}

impl From<&ActivityTypeRegistration> for TypeRef {
    fn from(r: &ActivityTypeRegistration) -> Self {
        TypeRef::new(&r.domain, &r.name, &r.version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Creating,
    Active,
    Deleting,
}
