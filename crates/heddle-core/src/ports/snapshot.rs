//! SnapshotStore port - decision task をまたぐ (state, data) の保存先
//!
//! 保存形式（シリアライズ）は実装側の責務です。

use async_trait::async_trait;

use crate::domain::errors::HeddleError;
use crate::domain::{Snapshot, WorkflowId};

#[async_trait]
pub trait SnapshotStore<D>: Send + Sync
where
    D: Send + Sync + 'static,
{
    async fn load(&self, workflow_id: &WorkflowId) -> Result<Option<Snapshot<D>>, HeddleError>;

    async fn save(&self, workflow_id: &WorkflowId, snapshot: Snapshot<D>) -> Result<(), HeddleError>;

    /// Forget the snapshot of a completed workflow. Removing a missing one is fine.
    async fn remove(&self, workflow_id: &WorkflowId) -> Result<(), HeddleError>;
}
