//! History events: the immutable, append-only record of one workflow run.
//!
//! Events are produced by the orchestration service and only ever read by
//! deciders. Resolution events (activity completed/failed/...) refer back to
//! the event that scheduled the work, the same way the service reports them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ActivityId, RunId, WorkflowId};
use super::task::WorkflowType;

/// One record in a run's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Monotonically increasing, unique within the run's history (starts at 1).
    pub event_id: i64,

    pub event_timestamp: DateTime<Utc>,

    pub attributes: EventAttributes,
}

impl HistoryEvent {
    pub fn new(event_id: i64, event_timestamp: DateTime<Utc>, attributes: EventAttributes) -> Self {
        Self {
            event_id,
            event_timestamp,
            attributes,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.attributes.kind()
    }

    /// Name of the signal, for `WorkflowExecutionSignaled` events.
    pub fn signal_name(&self) -> Option<&str> {
        match &self.attributes {
            EventAttributes::WorkflowExecutionSignaled { signal_name, .. } => Some(signal_name),
            _ => None,
        }
    }

    /// Timer id, for timer lifecycle events.
    pub fn timer_id(&self) -> Option<&str> {
        match &self.attributes {
            EventAttributes::TimerStarted { timer_id, .. }
            | EventAttributes::TimerFired { timer_id, .. }
            | EventAttributes::TimerCanceled { timer_id }
            | EventAttributes::StartTimerFailed { timer_id, .. } => Some(timer_id),
            _ => None,
        }
    }

    /// The scheduling event an activity resolution/progress event refers to.
    pub fn scheduled_event_id(&self) -> Option<i64> {
        match &self.attributes {
            EventAttributes::ActivityTaskStarted { scheduled_event_id }
            | EventAttributes::ActivityTaskCompleted { scheduled_event_id, .. }
            | EventAttributes::ActivityTaskFailed { scheduled_event_id, .. }
            | EventAttributes::ActivityTaskTimedOut { scheduled_event_id, .. }
            | EventAttributes::ActivityTaskCanceled { scheduled_event_id } => {
                Some(*scheduled_event_id)
            }
            _ => None,
        }
    }

    /// The signal-external initiation an outbound signal result refers to.
    pub fn initiated_event_id(&self) -> Option<i64> {
        match &self.attributes {
            EventAttributes::ExternalWorkflowExecutionSignaled {
                initiated_event_id, ..
            }
            | EventAttributes::SignalExternalWorkflowExecutionFailed {
                initiated_event_id, ..
            } => Some(*initiated_event_id),
            _ => None,
        }
    }

    /// Does this event resolve a unit of work (it is no longer outstanding)?
    pub fn resolves_activity(&self) -> bool {
        matches!(
            self.kind(),
            EventKind::ActivityTaskCompleted
                | EventKind::ActivityTaskFailed
                | EventKind::ActivityTaskTimedOut
                | EventKind::ActivityTaskCanceled
        )
    }
}

/// Kind-specific attributes.
///
/// Closed on purpose: deciders match on these exhaustively or fall through to
/// `_`, never on stringly-typed event names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventAttributes {
    WorkflowExecutionStarted {
        workflow_type: WorkflowType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<String>,
        /// State name handed over by a continue-as-new of the previous run.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        continued_state: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        continued_from_run_id: Option<RunId>,
    },
    WorkflowExecutionSignaled {
        signal_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<String>,
    },
    WorkflowExecutionCompleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    WorkflowExecutionFailed {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    WorkflowExecutionCanceled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    WorkflowExecutionContinuedAsNew {
        new_run_id: RunId,
    },

    DecisionTaskScheduled,
    DecisionTaskStarted {
        identity: String,
    },
    DecisionTaskCompleted {
        scheduled_event_id: i64,
        started_event_id: i64,
    },
    /// The task's decisions were not applied; a new task is scheduled.
    DecisionTaskFailed {
        scheduled_event_id: i64,
        started_event_id: i64,
        cause: String,
    },

    ActivityTaskScheduled {
        activity_id: ActivityId,
        activity_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<String>,
    },
    ActivityTaskStarted {
        scheduled_event_id: i64,
    },
    ActivityTaskCompleted {
        scheduled_event_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    ActivityTaskFailed {
        scheduled_event_id: i64,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    ActivityTaskTimedOut {
        scheduled_event_id: i64,
        timeout_type: String,
    },
    ActivityTaskCanceled {
        scheduled_event_id: i64,
    },

    TimerStarted {
        timer_id: String,
        start_to_fire_secs: u64,
    },
    TimerFired {
        timer_id: String,
        started_event_id: i64,
    },
    TimerCanceled {
        timer_id: String,
    },
    StartTimerFailed {
        timer_id: String,
        cause: String,
    },

    MarkerRecorded {
        marker_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },

    SignalExternalWorkflowExecutionInitiated {
        workflow_id: WorkflowId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<RunId>,
        signal_name: String,
    },
    ExternalWorkflowExecutionSignaled {
        initiated_event_id: i64,
        workflow_id: WorkflowId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<RunId>,
    },
    SignalExternalWorkflowExecutionFailed {
        initiated_event_id: i64,
        cause: String,
    },

    StartChildWorkflowExecutionInitiated {
        workflow_id: WorkflowId,
        workflow_type: WorkflowType,
    },
    ChildWorkflowExecutionStarted {
        workflow_id: WorkflowId,
        run_id: RunId,
    },
    ChildWorkflowExecutionCompleted {
        workflow_id: WorkflowId,
        run_id: RunId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    ChildWorkflowExecutionFailed {
        workflow_id: WorkflowId,
        run_id: RunId,
        reason: String,
    },
}

impl EventAttributes {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::WorkflowExecutionStarted { .. } => EventKind::WorkflowExecutionStarted,
            Self::WorkflowExecutionSignaled { .. } => EventKind::WorkflowExecutionSignaled,
            Self::WorkflowExecutionCompleted { .. } => EventKind::WorkflowExecutionCompleted,
            Self::WorkflowExecutionFailed { .. } => EventKind::WorkflowExecutionFailed,
            Self::WorkflowExecutionCanceled { .. } => EventKind::WorkflowExecutionCanceled,
            Self::WorkflowExecutionContinuedAsNew { .. } => {
                EventKind::WorkflowExecutionContinuedAsNew
            }
            Self::DecisionTaskScheduled => EventKind::DecisionTaskScheduled,
            Self::DecisionTaskStarted { .. } => EventKind::DecisionTaskStarted,
            Self::DecisionTaskCompleted { .. } => EventKind::DecisionTaskCompleted,
            Self::DecisionTaskFailed { .. } => EventKind::DecisionTaskFailed,
            Self::ActivityTaskScheduled { .. } => EventKind::ActivityTaskScheduled,
            Self::ActivityTaskStarted { .. } => EventKind::ActivityTaskStarted,
            Self::ActivityTaskCompleted { .. } => EventKind::ActivityTaskCompleted,
            Self::ActivityTaskFailed { .. } => EventKind::ActivityTaskFailed,
            Self::ActivityTaskTimedOut { .. } => EventKind::ActivityTaskTimedOut,
            Self::ActivityTaskCanceled { .. } => EventKind::ActivityTaskCanceled,
            Self::TimerStarted { .. } => EventKind::TimerStarted,
            Self::TimerFired { .. } => EventKind::TimerFired,
            Self::TimerCanceled { .. } => EventKind::TimerCanceled,
            Self::StartTimerFailed { .. } => EventKind::StartTimerFailed,
            Self::MarkerRecorded { .. } => EventKind::MarkerRecorded,
            Self::SignalExternalWorkflowExecutionInitiated { .. } => {
                EventKind::SignalExternalWorkflowExecutionInitiated
            }
            Self::ExternalWorkflowExecutionSignaled { .. } => {
                EventKind::ExternalWorkflowExecutionSignaled
            }
            Self::SignalExternalWorkflowExecutionFailed { .. } => {
                EventKind::SignalExternalWorkflowExecutionFailed
            }
            Self::StartChildWorkflowExecutionInitiated { .. } => {
                EventKind::StartChildWorkflowExecutionInitiated
            }
            Self::ChildWorkflowExecutionStarted { .. } => EventKind::ChildWorkflowExecutionStarted,
            Self::ChildWorkflowExecutionCompleted { .. } => {
                EventKind::ChildWorkflowExecutionCompleted
            }
            Self::ChildWorkflowExecutionFailed { .. } => EventKind::ChildWorkflowExecutionFailed,
        }
    }
}

/// Fieldless event kind, handy for logging and `matches!`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkflowExecutionStarted,
    WorkflowExecutionSignaled,
    WorkflowExecutionCompleted,
    WorkflowExecutionFailed,
    WorkflowExecutionCanceled,
    WorkflowExecutionContinuedAsNew,
    DecisionTaskScheduled,
    DecisionTaskStarted,
    DecisionTaskCompleted,
    DecisionTaskFailed,
    ActivityTaskScheduled,
    ActivityTaskStarted,
    ActivityTaskCompleted,
    ActivityTaskFailed,
    ActivityTaskTimedOut,
    ActivityTaskCanceled,
    TimerStarted,
    TimerFired,
    TimerCanceled,
    StartTimerFailed,
    MarkerRecorded,
    SignalExternalWorkflowExecutionInitiated,
    ExternalWorkflowExecutionSignaled,
    SignalExternalWorkflowExecutionFailed,
    StartChildWorkflowExecutionInitiated,
    ChildWorkflowExecutionStarted,
    ChildWorkflowExecutionCompleted,
    ChildWorkflowExecutionFailed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(attributes: EventAttributes) -> HistoryEvent {
        HistoryEvent::new(7, Utc::now(), attributes)
    }

    #[test]
    fn accessors_only_answer_for_their_kind() {
        let fired = event(EventAttributes::TimerFired {
            timer_id: "t1".to_string(),
            started_event_id: 3,
        });
        assert_eq!(fired.timer_id(), Some("t1"));
        assert_eq!(fired.signal_name(), None);
        assert_eq!(fired.scheduled_event_id(), None);

        let signaled = event(EventAttributes::WorkflowExecutionSignaled {
            signal_name: "go".to_string(),
            input: None,
        });
        assert_eq!(signaled.signal_name(), Some("go"));
        assert_eq!(signaled.kind(), EventKind::WorkflowExecutionSignaled);
    }

    #[test]
    fn activity_resolutions_point_at_scheduling_event() {
        let failed = event(EventAttributes::ActivityTaskFailed {
            scheduled_event_id: 5,
            reason: "boom".to_string(),
            details: None,
        });
        assert_eq!(failed.scheduled_event_id(), Some(5));
        assert!(failed.resolves_activity());

        let started = event(EventAttributes::ActivityTaskStarted {
            scheduled_event_id: 5,
        });
        assert!(!started.resolves_activity());
    }

    #[test]
    fn attributes_are_tagged_by_event_type() {
        let e = event(EventAttributes::DecisionTaskScheduled);
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["attributes"]["event_type"], "decision_task_scheduled");
    }
}
