//! Decision model: instructions sent back to the orchestration service.
//!
//! The decider layer only accumulates these in order. It never validates their
//! content; the service does that when the decision task is completed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ids::{ActivityId, RunId, WorkflowId};
use super::task::WorkflowType;

/// One instruction for the orchestration service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision_type", rename_all = "snake_case")]
pub enum Decision {
    ScheduleActivityTask {
        activity_id: ActivityId,
        activity_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<String>,
    },

    RequestCancelActivityTask {
        activity_id: ActivityId,
    },

    StartTimer {
        timer_id: String,
        start_to_fire: Duration,
    },

    CancelTimer {
        timer_id: String,
    },

    SignalExternalWorkflowExecution {
        workflow_id: WorkflowId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<RunId>,
        signal_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<String>,
    },

    RecordMarker {
        marker_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },

    StartChildWorkflowExecution {
        workflow_id: WorkflowId,
        workflow_type: WorkflowType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<String>,
    },

    CompleteWorkflowExecution {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },

    FailWorkflowExecution {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },

    CancelWorkflowExecution {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },

    /// Retire this run's history and start a fresh run in `state`.
    ContinueAsNewWorkflowExecution {
        state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<String>,
    },
}

impl Decision {
    pub fn schedule_activity(
        activity_id: impl Into<ActivityId>,
        activity_type: impl Into<String>,
        input: Option<String>,
    ) -> Self {
        Self::ScheduleActivityTask {
            activity_id: activity_id.into(),
            activity_type: activity_type.into(),
            input,
        }
    }

    pub fn start_timer(timer_id: impl Into<String>, start_to_fire: Duration) -> Self {
        Self::StartTimer {
            timer_id: timer_id.into(),
            start_to_fire,
        }
    }

    pub fn signal_external(
        workflow_id: WorkflowId,
        run_id: Option<RunId>,
        signal_name: impl Into<String>,
    ) -> Self {
        Self::SignalExternalWorkflowExecution {
            workflow_id,
            run_id,
            signal_name: signal_name.into(),
            input: None,
        }
    }

    pub fn complete_workflow(result: Option<String>) -> Self {
        Self::CompleteWorkflowExecution { result }
    }

    pub fn continue_as_new(state: impl Into<String>) -> Self {
        Self::ContinueAsNewWorkflowExecution {
            state: state.into(),
            input: None,
        }
    }

    /// Does this decision close the current run?
    pub fn is_close(&self) -> bool {
        matches!(
            self,
            Self::CompleteWorkflowExecution { .. }
                | Self::FailWorkflowExecution { .. }
                | Self::CancelWorkflowExecution { .. }
                | Self::ContinueAsNewWorkflowExecution { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_decisions_are_recognised() {
        assert!(Decision::complete_workflow(None).is_close());
        assert!(Decision::continue_as_new("waiting").is_close());
        assert!(!Decision::start_timer("t", Duration::from_secs(1)).is_close());
        assert!(!Decision::schedule_activity("a-1", "charge", None).is_close());
    }

    #[test]
    fn decision_is_tagged_enum() {
        let d = Decision::start_timer("FSM.ContinueWorkflow", Duration::from_secs(30));
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["decision_type"], "start_timer");
        assert_eq!(v["timer_id"], "FSM.ContinueWorkflow");
    }
}
