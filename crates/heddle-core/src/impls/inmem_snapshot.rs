//! InMemorySnapshotStore - 開発用の snapshot 保存先

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::errors::HeddleError;
use crate::domain::{Snapshot, WorkflowId};
use crate::ports::SnapshotStore;

/// Snapshots keyed by workflow id, behind a std mutex (never held across await).
pub struct InMemorySnapshotStore<D> {
    snapshots: Arc<Mutex<HashMap<WorkflowId, Snapshot<D>>>>,
}

impl<D> InMemorySnapshotStore<D> {
    pub fn new() -> Self {
        Self {
            snapshots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<D> Default for InMemorySnapshotStore<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> Clone for InMemorySnapshotStore<D> {
    fn clone(&self) -> Self {
        Self {
            snapshots: Arc::clone(&self.snapshots),
        }
    }
}

fn poisoned<T>(_: T) -> HeddleError {
    HeddleError::Snapshot("snapshot store lock poisoned".to_string())
}

#[async_trait]
impl<D> SnapshotStore<D> for InMemorySnapshotStore<D>
where
    D: Clone + Send + Sync + 'static,
{
    async fn load(&self, workflow_id: &WorkflowId) -> Result<Option<Snapshot<D>>, HeddleError> {
        let snapshots = self.snapshots.lock().map_err(poisoned)?;
        Ok(snapshots.get(workflow_id).cloned())
    }

    async fn save(&self, workflow_id: &WorkflowId, snapshot: Snapshot<D>) -> Result<(), HeddleError> {
        let mut snapshots = self.snapshots.lock().map_err(poisoned)?;
        snapshots.insert(workflow_id.clone(), snapshot);
        Ok(())
    }

    async fn remove(&self, workflow_id: &WorkflowId) -> Result<(), HeddleError> {
        let mut snapshots = self.snapshots.lock().map_err(poisoned)?;
        snapshots.remove(workflow_id);
        Ok(())
    }
}
