//! Fsm - 名前付き state と decider の対応表、decision task 1 件分の評価
//!
//! # 学習ポイント
//! - Builder パターン（FsmBuilder）と起動時検証（Fail-fast）
//! - history の再生: 既に判断済みの event は bookkeeping だけ、新しい event だけ decider に渡す
//!
//! # 使用例
//! ```
//! use heddle_core::app::FsmBuilder;
//! use heddle_core::decider::{compose, default_decider, on_started, transition};
//!
//! let fsm = FsmBuilder::<u32>::new()
//!     .name("counter")
//!     .state("start", compose(vec![on_started(vec![transition("counting")]), default_decider()]))
//!     .state("counting", default_decider())
//!     .initial_state("start")
//!     .build()
//!     .unwrap();
//! assert_eq!(fsm.initial_state(), "start");
//! ```

use std::collections::HashMap;

use crate::decider::{Decider, FsmContext};
use crate::domain::errors::HeddleError;
use crate::domain::{Decision, DecisionTask, EventAttributes, Outcome, Snapshot};

/// BuildError は FSM 構築時のエラー
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("no states registered")]
    NoStates,

    #[error("state '{0}' registered twice")]
    DuplicateState(String),

    #[error("initial state not set")]
    MissingInitialState,

    #[error("initial state '{0}' is not registered")]
    UnknownInitialState(String),
}

/// FsmBuilder は名前付き state を登録して Fsm を組み立てる
pub struct FsmBuilder<D> {
    name: Option<String>,
    states: Vec<(String, Decider<D>)>,
    initial_state: Option<String>,
}

impl<D> FsmBuilder<D>
where
    D: Clone + Default + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            name: None,
            states: Vec::new(),
            initial_state: None,
        }
    }

    /// Name used in logs and errors; defaults to the task's workflow type.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn state(mut self, name: impl Into<String>, decider: Decider<D>) -> Self {
        self.states.push((name.into(), decider));
        self
    }

    pub fn initial_state(mut self, name: impl Into<String>) -> Self {
        self.initial_state = Some(name.into());
        self
    }

    /// # 検証
    /// - state が 1 つ以上あること
    /// - 同じ名前の state が無いこと
    /// - initial state が登録済みであること
    pub fn build(self) -> Result<Fsm<D>, BuildError> {
        if self.states.is_empty() {
            return Err(BuildError::NoStates);
        }

        let mut states = HashMap::with_capacity(self.states.len());
        for (name, decider) in self.states {
            if states.contains_key(&name) {
                return Err(BuildError::DuplicateState(name));
            }
            states.insert(name, decider);
        }

        let initial_state = self.initial_state.ok_or(BuildError::MissingInitialState)?;
        if !states.contains_key(&initial_state) {
            return Err(BuildError::UnknownInitialState(initial_state));
        }

        Ok(Fsm {
            name: self.name,
            states,
            initial_state,
        })
    }
}

impl<D> Default for FsmBuilder<D>
where
    D: Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Result of deciding one decision task.
#[derive(Debug, Clone, PartialEq)]
pub struct Decided<D> {
    pub decisions: Vec<Decision>,
    /// State name and data to resume from on the next task.
    pub snapshot: Snapshot<D>,
    /// The execution is closed (completed, failed or canceled).
    pub completed: bool,
}

/// Named states, each driven by its own decider.
pub struct Fsm<D> {
    name: Option<String>,
    states: HashMap<String, Decider<D>>,
    initial_state: String,
}

impl<D> Fsm<D>
where
    D: Clone + Default + Send + Sync + 'static,
{
    pub fn initial_state(&self) -> &str {
        &self.initial_state
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    fn workflow_name(&self, task: &DecisionTask) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| task.workflow_type.to_string())
    }

    fn unknown_state(&self, task: &DecisionTask, state: &str) -> HeddleError {
        HeddleError::UnknownState {
            workflow: self.workflow_name(task),
            state: state.to_string(),
        }
    }

    /// State the run resumes in when there is no snapshot.
    fn starting_state(&self, task: &DecisionTask) -> String {
        task.events
            .iter()
            .find_map(|event| match &event.attributes {
                EventAttributes::WorkflowExecutionStarted {
                    continued_state: Some(state),
                    ..
                } => Some(state.clone()),
                _ => None,
            })
            .unwrap_or_else(|| self.initial_state.clone())
    }

    /// Decide one decision task.
    ///
    /// Starts from `snapshot` (else the continued-from state, else the initial
    /// state with default data), replays bookkeeping for events already decided
    /// on, then runs the current state's decider over every new event in order.
    pub fn decide(
        &self,
        task: &DecisionTask,
        snapshot: Option<Snapshot<D>>,
    ) -> Result<Decided<D>, HeddleError> {
        let (state, mut data) = match snapshot {
            Some(snapshot) => (snapshot.state, snapshot.data),
            None => (self.starting_state(task), D::default()),
        };
        if !self.has_state(&state) {
            return Err(self.unknown_state(task, &state));
        }

        let mut ctx = FsmContext::for_task(task, state);
        for event in task.old_events() {
            ctx.track(event);
        }

        let mut decisions = Vec::new();
        let mut completed = false;

        for event in task.new_events() {
            ctx.track_scheduled(event);
            let decider = self
                .states
                .get(ctx.state())
                .ok_or_else(|| self.unknown_state(task, ctx.state()))?;

            match decider.decide(&mut ctx, event, &data) {
                Outcome::Pass => {
                    tracing::warn!(
                        parent: ctx.span(),
                        event = %event.kind(),
                        event_id = event.event_id,
                        state = ctx.state(),
                        "no decider handled event"
                    );
                }
                Outcome::Continue {
                    decisions: mut contributed,
                    data: next,
                } => {
                    ctx.note_decisions(&contributed);
                    decisions.append(&mut contributed);
                    data = next;
                }
                Outcome::Transition {
                    decisions: mut contributed,
                    data: next,
                    state,
                } => {
                    if !self.has_state(&state) {
                        return Err(self.unknown_state(task, &state));
                    }
                    tracing::debug!(parent: ctx.span(), from = ctx.state(), to = %state, "transition");
                    ctx.note_decisions(&contributed);
                    decisions.append(&mut contributed);
                    data = next;
                    ctx.enter(state);
                }
                Outcome::Complete {
                    decisions: mut contributed,
                    data: next,
                } => {
                    decisions.append(&mut contributed);
                    data = next;
                    completed = true;
                    ctx.track_resolved(event);
                    break;
                }
            }
            ctx.track_resolved(event);
        }

        let completed = completed || decisions.iter().any(closes_execution);
        Ok(Decided {
            decisions,
            snapshot: Snapshot::new(ctx.state(), data),
            completed,
        })
    }
}

/// Close decisions other than continue-as-new end the workflow for good.
fn closes_execution(decision: &Decision) -> bool {
    decision.is_close() && !matches!(decision, Decision::ContinueAsNewWorkflowExecution { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decider::{
        add_decision, complete, compose, default_decider, on_activity_completed, on_signal_received,
        on_started, transition, update_state,
    };
    use crate::domain::{
        ActivityId, EventKind, HistoryEvent, RunId, TaskToken, WorkflowExecution, WorkflowId,
        WorkflowType,
    };
    use chrono::Utc;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Order {
        items: u32,
    }

    fn event(id: i64, attributes: EventAttributes) -> HistoryEvent {
        HistoryEvent::new(id, Utc::now(), attributes)
    }

    fn started(continued_state: Option<&str>) -> EventAttributes {
        EventAttributes::WorkflowExecutionStarted {
            workflow_type: WorkflowType::new("orders", "1"),
            input: None,
            continued_state: continued_state.map(str::to_string),
            continued_from_run_id: None,
        }
    }

    fn signaled(name: &str) -> EventAttributes {
        EventAttributes::WorkflowExecutionSignaled {
            signal_name: name.to_string(),
            input: None,
        }
    }

    fn task(attributes: Vec<EventAttributes>, previous_started_event_id: i64) -> DecisionTask {
        let events: Vec<HistoryEvent> = attributes
            .into_iter()
            .enumerate()
            .map(|(i, a)| event(i as i64 + 1, a))
            .collect();
        let started_event_id = events.len() as i64;
        DecisionTask {
            task_token: TaskToken::new("token"),
            workflow_type: WorkflowType::new("orders", "1"),
            execution: WorkflowExecution::new(WorkflowId::new("order-1"), RunId::new("run-1")),
            events,
            previous_started_event_id,
            started_event_id,
        }
    }

    fn fsm() -> Fsm<Order> {
        FsmBuilder::new()
            .name("orders")
            .state(
                "new",
                compose(vec![
                    on_started(vec![
                        add_decision(|_, _, _: &Order| Decision::schedule_activity("reserve-1", "reserve", None)),
                        transition("reserving"),
                    ]),
                    default_decider(),
                ]),
            )
            .state(
                "reserving",
                compose(vec![
                    on_signal_received("add", vec![update_state(|_, _, o: &mut Order| o.items += 1)]),
                    on_signal_received("teleport", vec![transition("nowhere")]),
                    on_activity_completed("reserve", vec![complete()]),
                    default_decider(),
                ]),
            )
            .initial_state("new")
            .build()
            .unwrap()
    }

    #[test]
    fn build_rejects_bad_definitions() {
        let err = FsmBuilder::<Order>::new().initial_state("a").build().err();
        assert_eq!(err, Some(BuildError::NoStates));

        let err = FsmBuilder::<Order>::new()
            .state("a", default_decider())
            .state("a", default_decider())
            .initial_state("a")
            .build()
            .err();
        assert_eq!(err, Some(BuildError::DuplicateState("a".to_string())));

        let err = FsmBuilder::<Order>::new()
            .state("a", default_decider())
            .build()
            .err();
        assert_eq!(err, Some(BuildError::MissingInitialState));

        let err = FsmBuilder::<Order>::new()
            .state("a", default_decider())
            .initial_state("b")
            .build()
            .err();
        assert_eq!(err, Some(BuildError::UnknownInitialState("b".to_string())));
    }

    #[test]
    fn first_task_starts_in_initial_state() {
        let task = task(
            vec![started(None), EventAttributes::DecisionTaskScheduled, EventAttributes::DecisionTaskStarted {
                identity: "w".to_string(),
            }],
            0,
        );
        let decided = fsm().decide(&task, None).unwrap();
        assert_eq!(
            decided.decisions,
            vec![Decision::schedule_activity("reserve-1", "reserve", None)]
        );
        assert_eq!(decided.snapshot, Snapshot::new("reserving", Order::default()));
        assert!(!decided.completed);
    }

    #[test]
    fn continued_run_resumes_in_carried_state() {
        let task = task(vec![started(Some("reserving")), signaled("add")], 0);
        let decided = fsm().decide(&task, None).unwrap();
        assert!(decided.decisions.is_empty());
        assert_eq!(decided.snapshot, Snapshot::new("reserving", Order { items: 1 }));
    }

    #[test]
    fn snapshot_wins_and_only_new_events_are_decided() {
        let task = task(
            vec![
                started(None),
                EventAttributes::DecisionTaskScheduled,
                EventAttributes::DecisionTaskStarted {
                    identity: "w".to_string(),
                },
                signaled("add"),
                signaled("add"),
            ],
            4,
        );
        let decided = fsm()
            .decide(&task, Some(Snapshot::new("reserving", Order { items: 5 })))
            .unwrap();
        assert_eq!(decided.snapshot.data, Order { items: 6 });
    }

    #[test]
    fn completion_in_new_events_uses_old_scheduling() {
        let task = task(
            vec![
                started(None),
                EventAttributes::ActivityTaskScheduled {
                    activity_id: ActivityId::new("reserve-1"),
                    activity_type: "reserve".to_string(),
                    input: None,
                },
                EventAttributes::ActivityTaskCompleted {
                    scheduled_event_id: 2,
                    result: None,
                },
                signaled("add"),
            ],
            2,
        );
        let decided = fsm()
            .decide(&task, Some(Snapshot::new("reserving", Order::default())))
            .unwrap();
        assert!(decided.completed);
        assert_eq!(decided.decisions, vec![Decision::complete_workflow(None)]);
        // processing stopped at completion, the later signal was not applied
        assert_eq!(decided.snapshot.data, Order::default());
    }

    #[test]
    fn transition_to_unknown_state_is_an_error() {
        let task = task(vec![started(Some("reserving")), signaled("teleport")], 0);
        let err = fsm().decide(&task, None).unwrap_err();
        assert!(matches!(err, HeddleError::UnknownState { ref state, .. } if state == "nowhere"));
    }

    #[test]
    fn unregistered_snapshot_state_is_an_error() {
        let task = task(vec![started(None)], 0);
        let err = fsm()
            .decide(&task, Some(Snapshot::new("gone", Order::default())))
            .unwrap_err();
        assert!(matches!(err, HeddleError::UnknownState { .. }));
    }

    #[test]
    fn unhandled_events_leave_state_alone() {
        let task = task(
            vec![started(Some("reserving")), EventAttributes::MarkerRecorded {
                marker_name: "m".to_string(),
                details: None,
            }],
            0,
        );
        let decided = fsm().decide(&task, None).unwrap();
        assert!(decided.decisions.is_empty());
        assert_eq!(decided.snapshot.state, "reserving");
        assert_eq!(task.events[1].kind(), EventKind::MarkerRecorded);
    }
}
