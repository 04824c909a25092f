//! RegistrationClient port - domain / type / stream の管理 API
//!
//! 2 回目の register は `AlreadyExists`、2 回目の deprecate は
//! `AlreadyDeprecated` を返します。呼び出し側（Migrator）はどちらも成功扱いにします。

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{
    ActivityTypeRegistration, DomainRegistration, StreamRegistration, StreamStatus, TypeRef,
    WorkflowTypeRegistration,
};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} is already deprecated")]
    AlreadyDeprecated(String),

    #[error("unknown resource: {0}")]
    UnknownResource(String),

    #[error("registration service error: {0}")]
    Service(String),
}

impl AdminError {
    /// Repeating a create/deprecate is not a failure.
    pub fn is_idempotent_repeat(&self) -> bool {
        matches!(self, AdminError::AlreadyExists(_) | AdminError::AlreadyDeprecated(_))
    }
}

#[async_trait]
pub trait RegistrationClient: Send + Sync {
    async fn register_domain(&self, domain: &DomainRegistration) -> Result<(), AdminError>;

    async fn deprecate_domain(&self, name: &str) -> Result<(), AdminError>;

    async fn register_workflow_type(&self, workflow: &WorkflowTypeRegistration) -> Result<(), AdminError>;

    async fn deprecate_workflow_type(&self, workflow: &TypeRef) -> Result<(), AdminError>;

    async fn register_activity_type(&self, activity: &ActivityTypeRegistration) -> Result<(), AdminError>;

    async fn deprecate_activity_type(&self, activity: &TypeRef) -> Result<(), AdminError>;

    async fn create_stream(&self, stream: &StreamRegistration) -> Result<(), AdminError>;

    async fn describe_stream(&self, name: &str) -> Result<StreamStatus, AdminError>;
}
