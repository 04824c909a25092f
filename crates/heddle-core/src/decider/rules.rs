//! Rules - event filters (OnX) and leaf builders.
//!
//! An `on_*` rule checks the event (or the state data) and, on match, runs the
//! composition of its nested deciders over the same arguments; otherwise it
//! passes. Leaf builders turn a small callback into a full decider.

use crate::domain::{Decision, EventAttributes, EventKind, HistoryEvent, Outcome};

use super::{Decider, FsmContext, compose};

/// Wrap `deciders` behind a match on the event.
fn on_event<D, M>(at: &'static str, matches: M, deciders: Vec<Decider<D>>) -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
    M: Fn(&FsmContext, &HistoryEvent) -> bool + Send + Sync + 'static,
{
    let inner = compose(deciders);
    Decider::new(move |ctx, event, data| {
        if !matches(ctx, event) {
            return Outcome::Pass;
        }
        ctx.trace(at);
        inner.decide(ctx, event, data)
    })
}

pub fn on_started<D>(deciders: Vec<Decider<D>>) -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
{
    on_event(
        "on-started",
        |_, event| event.kind() == EventKind::WorkflowExecutionStarted,
        deciders,
    )
}

pub fn on_child_started<D>(deciders: Vec<Decider<D>>) -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
{
    on_event(
        "on-child-started",
        |_, event| event.kind() == EventKind::ChildWorkflowExecutionStarted,
        deciders,
    )
}

/// Runs `deciders` for any event while `predicate` holds over the state data.
pub fn on_data<D, P>(predicate: P, deciders: Vec<Decider<D>>) -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
    P: Fn(&D) -> bool + Send + Sync + 'static,
{
    let inner = compose(deciders);
    Decider::new(move |ctx, event, data| {
        if !predicate(data) {
            return Outcome::Pass;
        }
        ctx.trace("on-data");
        inner.decide(ctx, event, data)
    })
}

pub fn on_signal_received<D>(signal_name: impl Into<String>, deciders: Vec<Decider<D>>) -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
{
    let signal_name = signal_name.into();
    on_event(
        "on-signal-received",
        move |_, event| event.signal_name() == Some(signal_name.as_str()),
        deciders,
    )
}

/// Matches the confirmation that a signal named `signal_name` reached its target.
pub fn on_signal_sent<D>(signal_name: impl Into<String>, deciders: Vec<Decider<D>>) -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
{
    let signal_name = signal_name.into();
    on_event(
        "on-signal-sent",
        move |ctx, event| {
            event.kind() == EventKind::ExternalWorkflowExecutionSignaled
                && ctx.signal_name_for(event) == Some(signal_name.as_str())
        },
        deciders,
    )
}

pub fn on_signal_failed<D>(signal_name: impl Into<String>, deciders: Vec<Decider<D>>) -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
{
    let signal_name = signal_name.into();
    on_event(
        "on-signal-failed",
        move |ctx, event| {
            event.kind() == EventKind::SignalExternalWorkflowExecutionFailed
                && ctx.signal_name_for(event) == Some(signal_name.as_str())
        },
        deciders,
    )
}

pub fn on_activity_completed<D>(activity_type: impl Into<String>, deciders: Vec<Decider<D>>) -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
{
    let activity_type = activity_type.into();
    on_event(
        "on-activity-completed",
        move |ctx, event| {
            event.kind() == EventKind::ActivityTaskCompleted
                && ctx
                    .activity_info(event)
                    .is_some_and(|info| info.activity_type == activity_type)
        },
        deciders,
    )
}

/// Failed, timed out and canceled all count as failure.
pub fn on_activity_failed<D>(activity_type: impl Into<String>, deciders: Vec<Decider<D>>) -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
{
    let activity_type = activity_type.into();
    on_event(
        "on-activity-failed",
        move |ctx, event| {
            matches!(
                event.attributes,
                EventAttributes::ActivityTaskFailed { .. }
                    | EventAttributes::ActivityTaskTimedOut { .. }
                    | EventAttributes::ActivityTaskCanceled { .. }
            ) && ctx
                .activity_info(event)
                .is_some_and(|info| info.activity_type == activity_type)
        },
        deciders,
    )
}

pub fn on_timer_fired<D>(timer_id: impl Into<String>, deciders: Vec<Decider<D>>) -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
{
    let timer_id = timer_id.into();
    on_event(
        "on-timer-fired",
        move |_, event| {
            event.kind() == EventKind::TimerFired && event.timer_id() == Some(timer_id.as_str())
        },
        deciders,
    )
}

// ----------------------------------------------------------------------
// leaf builders
// ----------------------------------------------------------------------

/// Continue with the one decision `f` builds.
pub fn add_decision<D, F>(f: F) -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
    F: Fn(&FsmContext, &HistoryEvent, &D) -> Decision + Send + Sync + 'static,
{
    Decider::new(move |ctx, event, data| {
        let decision = f(ctx, event, data);
        ctx.trace("decide");
        ctx.proceed(data.clone(), vec![decision])
    })
}

/// Continue with every decision `f` builds, in order.
pub fn add_decisions<D, F>(f: F) -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
    F: Fn(&FsmContext, &HistoryEvent, &D) -> Vec<Decision> + Send + Sync + 'static,
{
    Decider::new(move |ctx, event, data| {
        let decisions = f(ctx, event, data);
        ctx.trace("decide-many");
        ctx.proceed(data.clone(), decisions)
    })
}

/// Continue with the state data as `f` leaves it.
pub fn update_state<D, F>(f: F) -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
    F: Fn(&FsmContext, &HistoryEvent, &mut D) + Send + Sync + 'static,
{
    Decider::new(move |ctx, event, data: &D| {
        ctx.trace("update-state");
        let mut next = data.clone();
        f(ctx, event, &mut next);
        ctx.proceed(next, Vec::new())
    })
}

pub fn transition<D>(to_state: impl Into<String>) -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
{
    let to_state = to_state.into();
    Decider::new(move |ctx, _, data: &D| {
        ctx.trace("transition");
        ctx.goto(to_state.clone(), data.clone(), Vec::new())
    })
}

pub fn complete<D>() -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
{
    Decider::new(|ctx, _, data: &D| {
        tracing::info!(parent: ctx.span(), workflow_id = %ctx.workflow_id(), "complete workflow");
        ctx.complete(data.clone())
    })
}

pub fn stay<D>() -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
{
    Decider::new(|ctx, _, data: &D| {
        ctx.trace("stay");
        ctx.stay(data.clone(), Vec::new())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ActivityId, RunId, WorkflowExecution, WorkflowId, WorkflowType,
    };
    use chrono::Utc;
    use rstest::rstest;
    use std::time::Duration;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Order {
        paid: bool,
        attempts: u32,
    }

    fn ctx() -> FsmContext {
        let mut ctx = FsmContext::new(
            WorkflowType::new("orders", "1"),
            WorkflowExecution::new(WorkflowId::new("order-9"), RunId::new("run-9")),
            "waiting",
        );
        ctx.track(&event(
            5,
            EventAttributes::ActivityTaskScheduled {
                activity_id: ActivityId::new("charge-1"),
                activity_type: "charge".to_string(),
                input: None,
            },
        ));
        ctx.track(&event(
            6,
            EventAttributes::SignalExternalWorkflowExecutionInitiated {
                workflow_id: WorkflowId::new("shipping"),
                run_id: None,
                signal_name: "ship".to_string(),
            },
        ));
        ctx
    }

    fn event(id: i64, attributes: EventAttributes) -> HistoryEvent {
        HistoryEvent::new(id, Utc::now(), attributes)
    }

    fn marker() -> Decider<Order> {
        add_decision(|_, _, _| Decision::RecordMarker {
            marker_name: "hit".to_string(),
            details: None,
        })
    }

    fn started() -> HistoryEvent {
        event(
            1,
            EventAttributes::WorkflowExecutionStarted {
                workflow_type: WorkflowType::new("orders", "1"),
                input: None,
                continued_state: None,
                continued_from_run_id: None,
            },
        )
    }

    fn signaled(name: &str) -> HistoryEvent {
        event(
            10,
            EventAttributes::WorkflowExecutionSignaled {
                signal_name: name.to_string(),
                input: None,
            },
        )
    }

    fn completed() -> HistoryEvent {
        event(
            11,
            EventAttributes::ActivityTaskCompleted {
                scheduled_event_id: 5,
                result: None,
            },
        )
    }

    fn timed_out() -> HistoryEvent {
        event(
            11,
            EventAttributes::ActivityTaskTimedOut {
                scheduled_event_id: 5,
                timeout_type: "START_TO_CLOSE".to_string(),
            },
        )
    }

    fn sent() -> HistoryEvent {
        event(
            12,
            EventAttributes::ExternalWorkflowExecutionSignaled {
                initiated_event_id: 6,
                workflow_id: WorkflowId::new("shipping"),
                run_id: None,
            },
        )
    }

    fn send_failed() -> HistoryEvent {
        event(
            12,
            EventAttributes::SignalExternalWorkflowExecutionFailed {
                initiated_event_id: 6,
                cause: "UNKNOWN_EXTERNAL_WORKFLOW_EXECUTION".to_string(),
            },
        )
    }

    fn fired(timer_id: &str) -> HistoryEvent {
        event(
            13,
            EventAttributes::TimerFired {
                timer_id: timer_id.to_string(),
                started_event_id: 8,
            },
        )
    }

    #[rstest]
    #[case::started(on_started(vec![marker()]), started(), true)]
    #[case::started_other(on_started(vec![marker()]), signaled("go"), false)]
    #[case::signal(on_signal_received("go", vec![marker()]), signaled("go"), true)]
    #[case::signal_other_name(on_signal_received("stop", vec![marker()]), signaled("go"), false)]
    #[case::activity_completed(on_activity_completed("charge", vec![marker()]), completed(), true)]
    #[case::activity_completed_other(on_activity_completed("refund", vec![marker()]), completed(), false)]
    #[case::activity_timed_out(on_activity_failed("charge", vec![marker()]), timed_out(), true)]
    #[case::activity_failed_on_completion(on_activity_failed("charge", vec![marker()]), completed(), false)]
    #[case::signal_sent(on_signal_sent("ship", vec![marker()]), sent(), true)]
    #[case::signal_sent_other(on_signal_sent("cancel", vec![marker()]), sent(), false)]
    #[case::signal_failed(on_signal_failed("ship", vec![marker()]), send_failed(), true)]
    #[case::timer(on_timer_fired("reminder", vec![marker()]), fired("reminder"), true)]
    #[case::timer_other(on_timer_fired("reminder", vec![marker()]), fired("other"), false)]
    fn event_filters(#[case] rule: Decider<Order>, #[case] event: HistoryEvent, #[case] hit: bool) {
        let outcome = rule.decide(&mut ctx(), &event, &Order::default());
        assert_eq!(!outcome.is_pass(), hit);
        if hit {
            assert_eq!(outcome.decisions().len(), 1);
        }
    }

    #[test]
    fn on_data_gates_on_state_data() {
        let rule = on_data(|o: &Order| !o.paid, vec![marker()]);
        let unpaid = Order::default();
        let paid = Order {
            paid: true,
            ..Order::default()
        };
        assert!(!rule.decide(&mut ctx(), &signaled("x"), &unpaid).is_pass());
        assert!(rule.decide(&mut ctx(), &signaled("x"), &paid).is_pass());
    }

    #[test]
    fn update_state_then_transition() {
        let rule = on_signal_received(
            "paid",
            vec![
                update_state(|_, _, o: &mut Order| o.paid = true),
                add_decisions(|_, _, _: &Order| {
                    vec![
                        Decision::schedule_activity("ship-1", "ship", None),
                        Decision::start_timer("deadline", Duration::from_secs(60)),
                    ]
                }),
                transition("shipping"),
                stay(),
            ],
        );

        let outcome = rule.decide(&mut ctx(), &signaled("paid"), &Order::default());
        assert_eq!(outcome.state(), Some("shipping"));
        assert_eq!(outcome.decisions().len(), 2);
        assert_eq!(
            outcome.data(),
            Some(&Order {
                paid: true,
                attempts: 0
            })
        );
    }

    #[test]
    fn complete_emits_close_decision() {
        let rule = on_activity_completed("charge", vec![complete()]);
        let outcome = rule.decide(&mut ctx(), &completed(), &Order::default());
        assert!(matches!(outcome, Outcome::Complete { .. }));
        assert_eq!(outcome.decisions(), &[Decision::complete_workflow(None)]);
    }

    #[test]
    fn stay_keeps_data() {
        let data = Order {
            paid: false,
            attempts: 3,
        };
        let outcome = stay().decide(&mut ctx(), &signaled("x"), &data);
        assert_eq!(
            outcome,
            Outcome::Continue {
                decisions: vec![],
                data
            }
        );
    }
}
