//! InMemoryRegistrationClient - 開発用の管理 API
//!
//! 本物の service と同じく、繰り返しの create は `AlreadyExists`、
//! 繰り返しの deprecate は `AlreadyDeprecated` を返します。
//! stream は作成直後 `Creating` で、次の describe で `Active` になります。

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{
    ActivityTypeRegistration, DomainRegistration, StreamRegistration, StreamStatus, TypeRef,
    WorkflowTypeRegistration,
};
use crate::ports::{AdminError, RegistrationClient};

#[derive(Default)]
struct Registry {
    domains: HashMap<String, DomainRegistration>,
    workflow_types: HashMap<TypeRef, WorkflowTypeRegistration>,
    activity_types: HashMap<TypeRef, ActivityTypeRegistration>,
    deprecated_domains: HashSet<String>,
    deprecated_types: HashSet<TypeRef>,
    streams: HashMap<String, StreamStatus>,
}

#[derive(Default)]
pub struct InMemoryRegistrationClient {
    inner: Mutex<Registry>,
}

impl InMemoryRegistrationClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Registry) -> Result<T, AdminError>) -> Result<T, AdminError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| AdminError::Service("registry lock poisoned".to_string()))?;
        f(&mut inner)
    }

    pub fn has_domain(&self, name: &str) -> bool {
        self.with(|r| Ok(r.domains.contains_key(name))).unwrap_or(false)
    }

    pub fn has_workflow_type(&self, name: &str, version: &str) -> bool {
        self.with(|r| {
            Ok(r
                .workflow_types
                .keys()
                .any(|t| t.name == name && t.version == version))
        })
        .unwrap_or(false)
    }

    pub fn is_deprecated(&self, type_ref: &TypeRef) -> bool {
        self.with(|r| Ok(r.deprecated_types.contains(type_ref)))
            .unwrap_or(false)
    }
}

fn describe(type_ref: &TypeRef) -> String {
    format!("{}/{}@{}", type_ref.domain, type_ref.name, type_ref.version)
}

#[async_trait]
impl RegistrationClient for InMemoryRegistrationClient {
    async fn register_domain(&self, domain: &DomainRegistration) -> Result<(), AdminError> {
        self.with(|r| {
            if r.domains.contains_key(&domain.name) {
                return Err(AdminError::AlreadyExists(format!("domain {}", domain.name)));
            }
            r.domains.insert(domain.name.clone(), domain.clone());
            Ok(())
        })
    }

    async fn deprecate_domain(&self, name: &str) -> Result<(), AdminError> {
        self.with(|r| {
            if !r.domains.contains_key(name) {
                return Err(AdminError::UnknownResource(format!("domain {name}")));
            }
            if !r.deprecated_domains.insert(name.to_string()) {
                return Err(AdminError::AlreadyDeprecated(format!("domain {name}")));
            }
            Ok(())
        })
    }

    async fn register_workflow_type(&self, workflow: &WorkflowTypeRegistration) -> Result<(), AdminError> {
        let key = TypeRef::from(workflow);
        self.with(|r| {
            if !r.domains.contains_key(&workflow.domain) {
                return Err(AdminError::UnknownResource(format!("domain {}", workflow.domain)));
            }
            if r.workflow_types.contains_key(&key) {
                return Err(AdminError::AlreadyExists(format!("workflow type {}", describe(&key))));
            }
            r.workflow_types.insert(key, workflow.clone());
            Ok(())
        })
    }

    async fn deprecate_workflow_type(&self, workflow: &TypeRef) -> Result<(), AdminError> {
        self.with(|r| {
            if !r.workflow_types.contains_key(workflow) {
                return Err(AdminError::UnknownResource(format!("workflow type {}", describe(workflow))));
            }
            if !r.deprecated_types.insert(workflow.clone()) {
                return Err(AdminError::AlreadyDeprecated(format!("workflow type {}", describe(workflow))));
            }
            Ok(())
        })
    }

    async fn register_activity_type(&self, activity: &ActivityTypeRegistration) -> Result<(), AdminError> {
        let key = TypeRef::from(activity);
        self.with(|r| {
            if !r.domains.contains_key(&activity.domain) {
                return Err(AdminError::UnknownResource(format!("domain {}", activity.domain)));
            }
            if r.activity_types.contains_key(&key) {
                return Err(AdminError::AlreadyExists(format!("activity type {}", describe(&key))));
            }
            r.activity_types.insert(key, activity.clone());
            Ok(())
        })
    }

    async fn deprecate_activity_type(&self, activity: &TypeRef) -> Result<(), AdminError> {
        self.with(|r| {
            if !r.activity_types.contains_key(activity) {
                return Err(AdminError::UnknownResource(format!("activity type {}", describe(activity))));
            }
            if !r.deprecated_types.insert(activity.clone()) {
                return Err(AdminError::AlreadyDeprecated(format!("activity type {}", describe(activity))));
            }
            Ok(())
        })
    }

    async fn create_stream(&self, stream: &StreamRegistration) -> Result<(), AdminError> {
        self.with(|r| {
            if r.streams.contains_key(&stream.name) {
                return Err(AdminError::AlreadyExists(format!("stream {}", stream.name)));
            }
            r.streams.insert(stream.name.clone(), StreamStatus::Creating);
            Ok(())
        })
    }

    async fn describe_stream(&self, name: &str) -> Result<StreamStatus, AdminError> {
        self.with(|r| {
            let status = r
                .streams
                .get_mut(name)
                .ok_or_else(|| AdminError::UnknownResource(format!("stream {name}")))?;
            let current = *status;
            if current == StreamStatus::Creating {
                *status = StreamStatus::Active;
            }
            Ok(current)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain() -> DomainRegistration {
        DomainRegistration {
            name: "orders".to_string(),
            description: None,
            retention_days: 7,
        }
    }

    #[tokio::test]
    async fn repeats_are_reported_as_such() {
        let client = InMemoryRegistrationClient::new();
        client.register_domain(&domain()).await.unwrap();
        let err = client.register_domain(&domain()).await.unwrap_err();
        assert!(err.is_idempotent_repeat());

        client.deprecate_domain("orders").await.unwrap();
        let err = client.deprecate_domain("orders").await.unwrap_err();
        assert!(matches!(err, AdminError::AlreadyDeprecated(_)));
    }

    #[tokio::test]
    async fn workflow_type_needs_its_domain() {
        let client = InMemoryRegistrationClient::new();
        let wf = WorkflowTypeRegistration {
            domain: "orders".to_string(),
            name: "checkout".to_string(),
            version: "1".to_string(),
            description: None,
            default_task_list: None,
        };
        let err = client.register_workflow_type(&wf).await.unwrap_err();
        assert!(matches!(err, AdminError::UnknownResource(_)));
        assert!(!err.is_idempotent_repeat());

        client.register_domain(&domain()).await.unwrap();
        client.register_workflow_type(&wf).await.unwrap();
        assert!(client.has_workflow_type("checkout", "1"));
    }

    #[tokio::test]
    async fn stream_becomes_active() {
        let client = InMemoryRegistrationClient::new();
        let stream = StreamRegistration {
            name: "audit".to_string(),
            shard_count: 1,
        };
        client.create_stream(&stream).await.unwrap();
        assert_eq!(client.describe_stream("audit").await.unwrap(), StreamStatus::Creating);
        assert_eq!(client.describe_stream("audit").await.unwrap(), StreamStatus::Active);
    }
}
