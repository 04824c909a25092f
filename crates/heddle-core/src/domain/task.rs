//! Decision task: a slice of one run's history handed to the worker.
//!
//! `previous_started_event_id` splits the events into the part already
//! decided on (replayed for bookkeeping only) and the part to decide now.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::event::HistoryEvent;
use super::ids::{RunId, TaskToken, WorkflowId};

/// Declared workflow type (`name` + `version`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowType {
    pub name: String,
    pub version: String,
}

impl WorkflowType {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Identity of one run: workflow id + run id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_id: WorkflowId,
    pub run_id: RunId,
}

impl WorkflowExecution {
    pub fn new(workflow_id: WorkflowId, run_id: RunId) -> Self {
        Self {
            workflow_id,
            run_id,
        }
    }
}

impl fmt::Display for WorkflowExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workflow_id, self.run_id)
    }
}

/// A decision task handed to the worker by the orchestration service.
///
/// `events` is the run's history as delivered (full or tail); events with an
/// id above `previous_started_event_id` have not been decided on yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTask {
    pub task_token: TaskToken,
    pub workflow_type: WorkflowType,
    pub execution: WorkflowExecution,
    pub events: Vec<HistoryEvent>,

    /// Started-event id of the previous decision task (0 for the first one).
    #[serde(default)]
    pub previous_started_event_id: i64,

    pub started_event_id: i64,
}

impl DecisionTask {
    /// Events already decided on by an earlier decision task.
    pub fn old_events(&self) -> impl Iterator<Item = &HistoryEvent> {
        let previous = self.previous_started_event_id;
        self.events.iter().filter(move |e| e.event_id <= previous)
    }

    /// Events new since the previous decision task, in delivery order.
    pub fn new_events(&self) -> impl Iterator<Item = &HistoryEvent> {
        let previous = self.previous_started_event_id;
        self.events.iter().filter(move |e| e.event_id > previous)
    }
}
