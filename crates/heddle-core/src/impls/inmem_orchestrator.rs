//! InMemoryOrchestrator - 開発・テスト用の orchestration service
//!
//! run ごとに history を持ち、新しい event が積まれると decision task を
//! ready キューに載せます。返ってきた decision は本物の service と同じ順序で
//! history に反映します（close 系 decision 以降は無視）。
//!
//! activity や timer は自動では進みません。`complete_activity` / `fire_timer`
//! などの driver メソッドでテストや demo から進めます。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::domain::errors::HeddleError;
use crate::domain::{
    ActivityId, Decision, DecisionTask, EventAttributes, HistoryEvent, RunId, TaskToken,
    WorkflowExecution, WorkflowId, WorkflowType,
};
use crate::ports::{Clock, OrchestrationClient, SystemClock};

const UNHANDLED_DECISION: &str = "UNHANDLED_DECISION";

struct Run {
    workflow_type: WorkflowType,
    execution: WorkflowExecution,
    events: Vec<HistoryEvent>,
    open: bool,
    parent: Option<RunId>,

    previous_started_event_id: i64,
    /// DecisionTaskScheduled event waiting to be polled.
    scheduled_decision: Option<i64>,
    in_flight: Option<TaskToken>,
    /// Events arrived while a decision task was in flight.
    needs_decision: bool,

    /// timer id -> TimerStarted event id
    timers: HashMap<String, i64>,
    /// activity id -> ActivityTaskScheduled event id
    activities: HashMap<ActivityId, i64>,
}

struct InFlight {
    run_id: RunId,
    scheduled_event_id: i64,
    started_event_id: i64,
}

#[derive(Default)]
struct State {
    runs: HashMap<RunId, Run>,
    /// workflow id -> runs in start order (last is current)
    chains: HashMap<WorkflowId, Vec<RunId>>,
    ready: VecDeque<RunId>,
    tokens: HashMap<TaskToken, InFlight>,
}

impl State {
    fn current_run_id(&self, workflow_id: &WorkflowId) -> Option<&RunId> {
        self.chains.get(workflow_id).and_then(|chain| chain.last())
    }

    fn open_run_id(&self, workflow_id: &WorkflowId) -> Option<RunId> {
        self.current_run_id(workflow_id)
            .filter(|run_id| self.runs.get(*run_id).is_some_and(|run| run.open))
            .cloned()
    }

    fn open_run_mut(&mut self, workflow_id: &WorkflowId) -> Result<(RunId, &mut Run), HeddleError> {
        let run_id = self
            .open_run_id(workflow_id)
            .ok_or_else(|| HeddleError::UnknownExecution(workflow_id.clone()))?;
        let run = self
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| HeddleError::UnknownExecution(workflow_id.clone()))?;
        Ok((run_id, run))
    }

    fn append(&mut self, run_id: &RunId, at: DateTime<Utc>, attributes: EventAttributes) -> i64 {
        let Some(run) = self.runs.get_mut(run_id) else {
            return 0;
        };
        let event_id = run.events.len() as i64 + 1;
        run.events.push(HistoryEvent::new(event_id, at, attributes));
        event_id
    }

    /// Release an in-flight task without applying its decisions.
    ///
    /// The previous started event id stays put, so the next task hands the
    /// same events to the decider again.
    fn fail_decision_task(&mut self, in_flight: InFlight, cause: &str, at: DateTime<Utc>) {
        let InFlight {
            run_id,
            scheduled_event_id,
            started_event_id,
        } = in_flight;
        self.append(
            &run_id,
            at,
            EventAttributes::DecisionTaskFailed {
                scheduled_event_id,
                started_event_id,
                cause: cause.to_string(),
            },
        );
        if let Some(run) = self.runs.get_mut(&run_id) {
            run.in_flight = None;
            run.needs_decision = false;
        }
        self.request_decision(&run_id, at);
    }

    /// Schedule a decision task for `run_id` unless one is already pending.
    fn request_decision(&mut self, run_id: &RunId, at: DateTime<Utc>) {
        let Some(run) = self.runs.get_mut(run_id) else {
            return;
        };
        if !run.open || run.scheduled_decision.is_some() {
            return;
        }
        if run.in_flight.is_some() {
            run.needs_decision = true;
            return;
        }
        let event_id = self.append(run_id, at, EventAttributes::DecisionTaskScheduled);
        if let Some(run) = self.runs.get_mut(run_id) {
            run.scheduled_decision = Some(event_id);
        }
        self.ready.push_back(run_id.clone());
    }

    #[allow(clippy::too_many_arguments)]
    fn start_run(
        &mut self,
        workflow_type: WorkflowType,
        workflow_id: WorkflowId,
        input: Option<String>,
        continued_state: Option<String>,
        continued_from_run_id: Option<RunId>,
        parent: Option<RunId>,
        at: DateTime<Utc>,
    ) -> WorkflowExecution {
        let execution = WorkflowExecution::new(workflow_id.clone(), RunId::generate());
        let run_id = execution.run_id.clone();
        self.runs.insert(
            run_id.clone(),
            Run {
                workflow_type: workflow_type.clone(),
                execution: execution.clone(),
                events: Vec::new(),
                open: true,
                parent,
                previous_started_event_id: 0,
                scheduled_decision: None,
                in_flight: None,
                needs_decision: false,
                timers: HashMap::new(),
                activities: HashMap::new(),
            },
        );
        self.chains.entry(workflow_id).or_default().push(run_id.clone());
        self.append(
            &run_id,
            at,
            EventAttributes::WorkflowExecutionStarted {
                workflow_type,
                input,
                continued_state,
                continued_from_run_id,
            },
        );
        self.request_decision(&run_id, at);
        execution
    }

    fn close(&mut self, run_id: &RunId, at: DateTime<Utc>, attributes: EventAttributes) {
        let child_result = match &attributes {
            EventAttributes::WorkflowExecutionCompleted { result } => Some(Ok(result.clone())),
            EventAttributes::WorkflowExecutionFailed { reason, .. } => Some(Err(reason.clone())),
            _ => None,
        };
        self.append(run_id, at, attributes);

        let Some(run) = self.runs.get_mut(run_id) else {
            return;
        };
        run.open = false;
        run.scheduled_decision = None;
        let execution = run.execution.clone();

        if let (Some(parent), Some(result)) = (run.parent.clone(), child_result) {
            let attributes = match result {
                Ok(result) => EventAttributes::ChildWorkflowExecutionCompleted {
                    workflow_id: execution.workflow_id,
                    run_id: execution.run_id,
                    result,
                },
                Err(reason) => EventAttributes::ChildWorkflowExecutionFailed {
                    workflow_id: execution.workflow_id,
                    run_id: execution.run_id,
                    reason,
                },
            };
            self.append(&parent, at, attributes);
            self.request_decision(&parent, at);
        }
    }

    /// Apply one decision of `run_id`'s decision task. Returns false once the
    /// run is closed.
    fn apply(&mut self, run_id: &RunId, decision: Decision, at: DateTime<Utc>) -> bool {
        match decision {
            Decision::ScheduleActivityTask {
                activity_id,
                activity_type,
                input,
            } => {
                let event_id = self.append(
                    run_id,
                    at,
                    EventAttributes::ActivityTaskScheduled {
                        activity_id: activity_id.clone(),
                        activity_type,
                        input,
                    },
                );
                if let Some(run) = self.runs.get_mut(run_id) {
                    run.activities.insert(activity_id, event_id);
                }
            }
            Decision::RequestCancelActivityTask { activity_id } => {
                let scheduled = self
                    .runs
                    .get_mut(run_id)
                    .and_then(|run| run.activities.remove(&activity_id));
                match scheduled {
                    Some(scheduled_event_id) => {
                        self.append(
                            run_id,
                            at,
                            EventAttributes::ActivityTaskCanceled { scheduled_event_id },
                        );
                        self.request_decision(run_id, at);
                    }
                    None => {
                        tracing::warn!(%activity_id, "cancel requested for unknown activity");
                    }
                }
            }
            Decision::StartTimer {
                timer_id,
                start_to_fire,
            } => {
                let in_use = self
                    .runs
                    .get(run_id)
                    .is_some_and(|run| run.timers.contains_key(&timer_id));
                if in_use {
                    self.append(
                        run_id,
                        at,
                        EventAttributes::StartTimerFailed {
                            timer_id,
                            cause: "TIMER_ID_ALREADY_IN_USE".to_string(),
                        },
                    );
                    self.request_decision(run_id, at);
                } else {
                    let event_id = self.append(
                        run_id,
                        at,
                        EventAttributes::TimerStarted {
                            timer_id: timer_id.clone(),
                            start_to_fire_secs: start_to_fire.as_secs(),
                        },
                    );
                    if let Some(run) = self.runs.get_mut(run_id) {
                        run.timers.insert(timer_id, event_id);
                    }
                }
            }
            Decision::CancelTimer { timer_id } => {
                let removed = self
                    .runs
                    .get_mut(run_id)
                    .and_then(|run| run.timers.remove(&timer_id));
                if removed.is_some() {
                    self.append(run_id, at, EventAttributes::TimerCanceled { timer_id });
                }
            }
            Decision::SignalExternalWorkflowExecution {
                workflow_id,
                run_id: target_run,
                signal_name,
                input,
            } => {
                let initiated_event_id = self.append(
                    run_id,
                    at,
                    EventAttributes::SignalExternalWorkflowExecutionInitiated {
                        workflow_id: workflow_id.clone(),
                        run_id: target_run.clone(),
                        signal_name: signal_name.clone(),
                    },
                );
                let target = match &target_run {
                    Some(target) => Some(target.clone()),
                    None => self.current_run_id(&workflow_id).cloned(),
                }
                .filter(|target| self.runs.get(target).is_some_and(|run| run.open));

                match target {
                    Some(target) => {
                        self.append(
                            &target,
                            at,
                            EventAttributes::WorkflowExecutionSignaled { signal_name, input },
                        );
                        self.request_decision(&target, at);
                        self.append(
                            run_id,
                            at,
                            EventAttributes::ExternalWorkflowExecutionSignaled {
                                initiated_event_id,
                                workflow_id,
                                run_id: Some(target),
                            },
                        );
                    }
                    None => {
                        self.append(
                            run_id,
                            at,
                            EventAttributes::SignalExternalWorkflowExecutionFailed {
                                initiated_event_id,
                                cause: "UNKNOWN_EXTERNAL_WORKFLOW_EXECUTION".to_string(),
                            },
                        );
                    }
                }
                self.request_decision(run_id, at);
            }
            Decision::RecordMarker {
                marker_name,
                details,
            } => {
                self.append(run_id, at, EventAttributes::MarkerRecorded { marker_name, details });
            }
            Decision::StartChildWorkflowExecution {
                workflow_id,
                workflow_type,
                input,
            } => {
                self.append(
                    run_id,
                    at,
                    EventAttributes::StartChildWorkflowExecutionInitiated {
                        workflow_id: workflow_id.clone(),
                        workflow_type: workflow_type.clone(),
                    },
                );
                if self.open_run_id(&workflow_id).is_some() {
                    tracing::warn!(%workflow_id, "child workflow already running");
                } else {
                    let child = self.start_run(
                        workflow_type,
                        workflow_id,
                        input,
                        None,
                        None,
                        Some(run_id.clone()),
                        at,
                    );
                    self.append(
                        run_id,
                        at,
                        EventAttributes::ChildWorkflowExecutionStarted {
                            workflow_id: child.workflow_id,
                            run_id: child.run_id,
                        },
                    );
                    self.request_decision(run_id, at);
                }
            }
            Decision::CompleteWorkflowExecution { result } => {
                self.close(run_id, at, EventAttributes::WorkflowExecutionCompleted { result });
                return false;
            }
            Decision::FailWorkflowExecution { reason, details } => {
                self.close(run_id, at, EventAttributes::WorkflowExecutionFailed { reason, details });
                return false;
            }
            Decision::CancelWorkflowExecution { details } => {
                self.close(run_id, at, EventAttributes::WorkflowExecutionCanceled { details });
                return false;
            }
            Decision::ContinueAsNewWorkflowExecution { state, input } => {
                let Some((workflow_type, workflow_id)) = self
                    .runs
                    .get(run_id)
                    .map(|run| (run.workflow_type.clone(), run.execution.workflow_id.clone()))
                else {
                    return false;
                };
                let next = RunId::generate();
                self.close(
                    run_id,
                    at,
                    EventAttributes::WorkflowExecutionContinuedAsNew {
                        new_run_id: next.clone(),
                    },
                );
                let execution = self.start_run(
                    workflow_type,
                    workflow_id,
                    input,
                    Some(state),
                    Some(run_id.clone()),
                    None,
                    at,
                );
                tracing::debug!(
                    from = %run_id,
                    to = %execution.run_id,
                    "continued as new"
                );
                return false;
            }
        }
        true
    }
}

/// In-process orchestration service with a single decision task list.
pub struct InMemoryOrchestrator {
    state: Mutex<State>,
    notify: Notify,
    clock: Arc<dyn Clock>,
    poll_timeout: Duration,
}

impl InMemoryOrchestrator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            clock,
            poll_timeout: Duration::from_millis(200),
        }
    }

    /// How long `poll_for_decision_task` waits before returning `None`.
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, HeddleError> {
        self.state
            .lock()
            .map_err(|_| HeddleError::Service("orchestrator lock poisoned".to_string()))
    }

    fn wake(&self, state: &State) {
        if !state.ready.is_empty() {
            self.notify.notify_one();
        }
    }

    pub fn start_workflow(
        &self,
        workflow_type: WorkflowType,
        workflow_id: WorkflowId,
        input: Option<String>,
    ) -> Result<WorkflowExecution, HeddleError> {
        let at = self.clock.now();
        let mut state = self.lock()?;
        if state.open_run_id(&workflow_id).is_some() {
            return Err(HeddleError::Other(format!(
                "workflow execution already started: {workflow_id}"
            )));
        }
        let execution = state.start_run(workflow_type, workflow_id, input, None, None, None, at);
        tracing::info!(%execution, "workflow started");
        self.wake(&state);
        Ok(execution)
    }

    pub fn signal_workflow(
        &self,
        workflow_id: &WorkflowId,
        signal_name: impl Into<String>,
        input: Option<String>,
    ) -> Result<(), HeddleError> {
        let at = self.clock.now();
        let mut state = self.lock()?;
        let (run_id, _) = state.open_run_mut(workflow_id)?;
        state.append(
            &run_id,
            at,
            EventAttributes::WorkflowExecutionSignaled {
                signal_name: signal_name.into(),
                input,
            },
        );
        state.request_decision(&run_id, at);
        self.wake(&state);
        Ok(())
    }

    pub fn complete_activity(
        &self,
        workflow_id: &WorkflowId,
        activity_id: &ActivityId,
        result: Option<String>,
    ) -> Result<(), HeddleError> {
        self.resolve_activity(workflow_id, activity_id, |scheduled_event_id| {
            EventAttributes::ActivityTaskCompleted {
                scheduled_event_id,
                result,
            }
        })
    }

    pub fn fail_activity(
        &self,
        workflow_id: &WorkflowId,
        activity_id: &ActivityId,
        reason: impl Into<String>,
    ) -> Result<(), HeddleError> {
        let reason = reason.into();
        self.resolve_activity(workflow_id, activity_id, |scheduled_event_id| {
            EventAttributes::ActivityTaskFailed {
                scheduled_event_id,
                reason,
                details: None,
            }
        })
    }

    fn resolve_activity(
        &self,
        workflow_id: &WorkflowId,
        activity_id: &ActivityId,
        attributes: impl FnOnce(i64) -> EventAttributes,
    ) -> Result<(), HeddleError> {
        let at = self.clock.now();
        let mut state = self.lock()?;
        let (run_id, run) = state.open_run_mut(workflow_id)?;
        let scheduled_event_id = run
            .activities
            .remove(activity_id)
            .ok_or_else(|| HeddleError::Other(format!("unknown activity: {activity_id}")))?;
        state.append(&run_id, at, attributes(scheduled_event_id));
        state.request_decision(&run_id, at);
        self.wake(&state);
        Ok(())
    }

    /// Fire an active timer. Returns false when no such timer is running.
    pub fn fire_timer(&self, workflow_id: &WorkflowId, timer_id: &str) -> Result<bool, HeddleError> {
        let at = self.clock.now();
        let mut state = self.lock()?;
        let (run_id, run) = state.open_run_mut(workflow_id)?;
        let Some(started_event_id) = run.timers.remove(timer_id) else {
            return Ok(false);
        };
        state.append(
            &run_id,
            at,
            EventAttributes::TimerFired {
                timer_id: timer_id.to_string(),
                started_event_id,
            },
        );
        state.request_decision(&run_id, at);
        self.wake(&state);
        Ok(true)
    }

    /// History of the workflow's current (latest) run.
    pub fn history(&self, workflow_id: &WorkflowId) -> Result<Vec<HistoryEvent>, HeddleError> {
        let state = self.lock()?;
        let run_id = state
            .current_run_id(workflow_id)
            .ok_or_else(|| HeddleError::UnknownExecution(workflow_id.clone()))?;
        Ok(state
            .runs
            .get(run_id)
            .map(|run| run.events.clone())
            .unwrap_or_default())
    }

    /// Every run of the workflow, oldest first.
    pub fn run_ids(&self, workflow_id: &WorkflowId) -> Result<Vec<RunId>, HeddleError> {
        let state = self.lock()?;
        Ok(state.chains.get(workflow_id).cloned().unwrap_or_default())
    }

    pub fn is_open(&self, workflow_id: &WorkflowId) -> Result<bool, HeddleError> {
        Ok(self.lock()?.open_run_id(workflow_id).is_some())
    }

    pub fn active_timers(&self, workflow_id: &WorkflowId) -> Result<Vec<String>, HeddleError> {
        let mut state = self.lock()?;
        let (_, run) = state.open_run_mut(workflow_id)?;
        let mut timers: Vec<String> = run.timers.keys().cloned().collect();
        timers.sort();
        Ok(timers)
    }

    pub fn open_activities(&self, workflow_id: &WorkflowId) -> Result<Vec<ActivityId>, HeddleError> {
        let mut state = self.lock()?;
        let (_, run) = state.open_run_mut(workflow_id)?;
        let mut activities: Vec<ActivityId> = run.activities.keys().cloned().collect();
        activities.sort();
        Ok(activities)
    }

    fn take_ready(&self, identity: &str) -> Result<Option<DecisionTask>, HeddleError> {
        let at = self.clock.now();
        let mut state = self.lock()?;
        while let Some(run_id) = state.ready.pop_front() {
            let scheduled = match state.runs.get_mut(&run_id) {
                Some(run) if run.open => run.scheduled_decision.take(),
                _ => None,
            };
            let Some(scheduled_event_id) = scheduled else {
                continue;
            };

            let started_event_id = state.append(
                &run_id,
                at,
                EventAttributes::DecisionTaskStarted {
                    identity: identity.to_string(),
                },
            );
            let token = TaskToken::generate();
            let Some(run) = state.runs.get_mut(&run_id) else {
                continue;
            };
            run.in_flight = Some(token.clone());
            let task = DecisionTask {
                task_token: token.clone(),
                workflow_type: run.workflow_type.clone(),
                execution: run.execution.clone(),
                events: run.events.clone(),
                previous_started_event_id: run.previous_started_event_id,
                started_event_id,
            };
            state.tokens.insert(
                token,
                InFlight {
                    run_id,
                    scheduled_event_id,
                    started_event_id,
                },
            );
            // more work may be waiting for another poller
            self.wake(&state);
            return Ok(Some(task));
        }
        Ok(None)
    }
}

impl Default for InMemoryOrchestrator {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl OrchestrationClient for InMemoryOrchestrator {
    async fn poll_for_decision_task(
        &self,
        task_list: &str,
        identity: &str,
    ) -> Result<Option<DecisionTask>, HeddleError> {
        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        loop {
            if let Some(task) = self.take_ready(identity)? {
                tracing::debug!(
                    task_list,
                    execution = %task.execution,
                    events = task.events.len(),
                    "decision task handed out"
                );
                return Ok(Some(task));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn respond_decision_task_completed(
        &self,
        task_token: &TaskToken,
        decisions: Vec<Decision>,
    ) -> Result<(), HeddleError> {
        let at = self.clock.now();
        let mut state = self.lock()?;
        let in_flight = state
            .tokens
            .remove(task_token)
            .ok_or_else(|| HeddleError::UnknownTaskToken(task_token.clone()))?;

        // a run may not close over events its decider has not seen
        let unhandled = state
            .runs
            .get(&in_flight.run_id)
            .is_some_and(|run| run.needs_decision);
        if unhandled && decisions.iter().any(Decision::is_close) {
            let run_id = in_flight.run_id.clone();
            tracing::warn!(
                %run_id,
                rejected = decisions.len(),
                "close decision rejected: unhandled events arrived during the task"
            );
            state.fail_decision_task(in_flight, UNHANDLED_DECISION, at);
            self.wake(&state);
            return Err(HeddleError::DecisionRejected(format!(
                "{UNHANDLED_DECISION}: run {run_id} received events during the task"
            )));
        }

        let InFlight {
            run_id,
            scheduled_event_id,
            started_event_id,
        } = in_flight;
        state.append(
            &run_id,
            at,
            EventAttributes::DecisionTaskCompleted {
                scheduled_event_id,
                started_event_id,
            },
        );
        let needs_decision = match state.runs.get_mut(&run_id) {
            Some(run) => {
                run.previous_started_event_id = started_event_id;
                run.in_flight = None;
                std::mem::take(&mut run.needs_decision)
            }
            None => false,
        };

        let total = decisions.len();
        for (applied, decision) in decisions.into_iter().enumerate() {
            if !state.apply(&run_id, decision, at) {
                let ignored = total - applied - 1;
                if ignored > 0 {
                    tracing::warn!(%run_id, ignored, "decisions after close were ignored");
                }
                break;
            }
        }

        if needs_decision {
            state.request_decision(&run_id, at);
        }
        self.wake(&state);
        Ok(())
    }

    async fn respond_decision_task_failed(
        &self,
        task_token: &TaskToken,
        cause: &str,
    ) -> Result<(), HeddleError> {
        let at = self.clock.now();
        let mut state = self.lock()?;
        let in_flight = state
            .tokens
            .remove(task_token)
            .ok_or_else(|| HeddleError::UnknownTaskToken(task_token.clone()))?;
        tracing::debug!(run_id = %in_flight.run_id, cause, "decision task failed");
        state.fail_decision_task(in_flight, cause, at);
        self.wake(&state);
        Ok(())
    }
}
