//! FsmContext - one decision task's view of an execution.
//!
//! Created fresh for every decision task and dropped once the decisions are
//! submitted. Deciders read identity and the outstanding-work registry from it,
//! build outcomes through it, and log through its span.

use std::collections::BTreeMap;

use tracing::Span;

use crate::domain::config::PendingWorkPolicy;
use crate::domain::event::{EventAttributes, HistoryEvent};
use crate::domain::ids::{ActivityId, RunId, WorkflowId};
use crate::domain::task::{DecisionTask, WorkflowExecution, WorkflowType};
use crate::domain::{Decision, Outcome};

/// Descriptive info about a scheduled, not yet resolved, activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityInfo {
    pub activity_id: ActivityId,
    pub activity_type: String,
}

/// Per-decision-task execution context.
#[derive(Debug)]
pub struct FsmContext {
    workflow_type: WorkflowType,
    execution: WorkflowExecution,
    state: String,

    /// scheduled event id -> activity, for work acknowledged by the service.
    activities: BTreeMap<i64, ActivityInfo>,

    /// Activities scheduled by decisions accumulated in this pass.
    undelivered: BTreeMap<ActivityId, ActivityInfo>,

    /// initiated event id -> signal name, for outbound signals.
    signals: BTreeMap<i64, String>,

    span: Span,
}

impl FsmContext {
    pub fn new(workflow_type: WorkflowType, execution: WorkflowExecution, state: impl Into<String>) -> Self {
        let span = tracing::info_span!(
            "decision_task",
            workflow = %workflow_type,
            workflow_id = %execution.workflow_id,
            run_id = %execution.run_id,
        );
        Self {
            workflow_type,
            execution,
            state: state.into(),
            activities: BTreeMap::new(),
            undelivered: BTreeMap::new(),
            signals: BTreeMap::new(),
            span,
        }
    }

    pub fn for_task(task: &DecisionTask, state: impl Into<String>) -> Self {
        Self::new(task.workflow_type.clone(), task.execution.clone(), state)
    }

    pub fn workflow_type(&self) -> &WorkflowType {
        &self.workflow_type
    }

    pub fn execution(&self) -> &WorkflowExecution {
        &self.execution
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.execution.workflow_id
    }

    pub fn run_id(&self) -> &RunId {
        &self.execution.run_id
    }

    /// Current logical state name.
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Only the FSM moves the state, on a Transition outcome.
    pub(crate) fn enter(&mut self, state: impl Into<String>) {
        self.state = state.into();
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Emit a decider log line under this task's span.
    pub fn trace(&self, at: &str) {
        tracing::debug!(parent: &self.span, at, state = %self.state);
    }

    // ------------------------------------------------------------------
    // outstanding-work registry
    // ------------------------------------------------------------------

    /// The activity an activity-lifecycle event refers to.
    pub fn activity_info(&self, event: &HistoryEvent) -> Option<&ActivityInfo> {
        match &event.attributes {
            EventAttributes::ActivityTaskScheduled { .. } => self.activities.get(&event.event_id),
            _ => event
                .scheduled_event_id()
                .and_then(|id| self.activities.get(&id)),
        }
    }

    /// Scheduled-but-unresolved activities known to the service.
    pub fn activities_info(&self) -> impl Iterator<Item = &ActivityInfo> {
        self.activities.values()
    }

    /// Activities decided in this pass but not yet seen in history.
    pub fn undelivered_activities(&self) -> impl Iterator<Item = &ActivityInfo> {
        self.undelivered.values()
    }

    pub fn has_outstanding_work(&self, policy: PendingWorkPolicy) -> bool {
        match policy {
            PendingWorkPolicy::Acknowledged => !self.activities.is_empty(),
            PendingWorkPolicy::IncludeUndelivered => {
                !self.activities.is_empty() || !self.undelivered.is_empty()
            }
        }
    }

    /// Name of the signal an outbound-signal result event refers to.
    pub fn signal_name_for(&self, event: &HistoryEvent) -> Option<&str> {
        event
            .initiated_event_id()
            .and_then(|id| self.signals.get(&id))
            .map(String::as_str)
    }

    /// Record the scheduling side of an event (before deciders see it).
    pub(crate) fn track_scheduled(&mut self, event: &HistoryEvent) {
        match &event.attributes {
            EventAttributes::ActivityTaskScheduled {
                activity_id,
                activity_type,
                ..
            } => {
                self.undelivered.remove(activity_id);
                self.activities.insert(
                    event.event_id,
                    ActivityInfo {
                        activity_id: activity_id.clone(),
                        activity_type: activity_type.clone(),
                    },
                );
            }
            EventAttributes::SignalExternalWorkflowExecutionInitiated { signal_name, .. } => {
                self.signals.insert(event.event_id, signal_name.clone());
            }
            _ => {}
        }
    }

    /// Record the resolution side of an event (after deciders saw it).
    pub(crate) fn track_resolved(&mut self, event: &HistoryEvent) {
        if event.resolves_activity()
            && let Some(id) = event.scheduled_event_id()
        {
            self.activities.remove(&id);
        }
    }

    /// Replay bookkeeping for an event decided on by an earlier task.
    pub(crate) fn track(&mut self, event: &HistoryEvent) {
        self.track_scheduled(event);
        self.track_resolved(event);
    }

    /// Note activities scheduled by decisions accumulated in this pass.
    /// Idempotent: keyed by activity id.
    pub(crate) fn note_decisions(&mut self, decisions: &[Decision]) {
        for decision in decisions {
            if let Decision::ScheduleActivityTask {
                activity_id,
                activity_type,
                ..
            } = decision
            {
                self.undelivered
                    .entry(activity_id.clone())
                    .or_insert_with(|| ActivityInfo {
                        activity_id: activity_id.clone(),
                        activity_type: activity_type.clone(),
                    });
            }
        }
    }

    // ------------------------------------------------------------------
    // outcome factories
    // ------------------------------------------------------------------

    /// Continue in the current state (no transition).
    pub fn stay<D>(&self, data: D, decisions: Vec<Decision>) -> Outcome<D> {
        Outcome::Continue { decisions, data }
    }

    /// Continue, letting later rules run.
    pub fn proceed<D>(&self, data: D, decisions: Vec<Decision>) -> Outcome<D> {
        Outcome::Continue { decisions, data }
    }

    /// Move to `state`.
    pub fn goto<D>(&self, state: impl Into<String>, data: D, decisions: Vec<Decision>) -> Outcome<D> {
        Outcome::Transition {
            decisions,
            data,
            state: state.into(),
        }
    }

    /// Complete the execution with a bare complete decision.
    pub fn complete<D>(&self, data: D) -> Outcome<D> {
        self.complete_with(data, Vec::new())
    }

    /// Complete the execution after `decisions`.
    pub fn complete_with<D>(&self, data: D, mut decisions: Vec<Decision>) -> Outcome<D> {
        if !decisions.iter().any(Decision::is_close) {
            decisions.push(Decision::complete_workflow(None));
        }
        Outcome::Complete { decisions, data }
    }

    /// Continue-as-new decision that resumes the next run in `state`.
    pub fn continue_workflow_decision(&self, state: &str) -> Decision {
        Decision::continue_as_new(state)
    }
}
