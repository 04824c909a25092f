//! Decider - (context, event, state data) から Outcome を計算する関数
//!
//! Decider は閉包（closure）の薄いラッパーです。
//! - `compose` で順序付きリストにまとめる（Pass は透過、Continue は蓄積、
//!   Transition / Complete はそこで打ち切り）
//! - `rules` の OnX / leaf builder で宣言的にルールを書く
//! - `continuations` は history を有限に保つ組み込み decider
//!
//! 評価は同期・単一スレッドで、I/O を持ちません。ログは `FsmContext::trace` 経由。

pub mod context;
pub mod continuations;
pub mod rules;

use std::fmt;
use std::sync::Arc;

use crate::domain::{HistoryEvent, Outcome};

pub use context::{ActivityInfo, FsmContext};
pub use continuations::managed_continuations;
pub use rules::{
    add_decision, add_decisions, complete, on_activity_completed, on_activity_failed, on_child_started,
    on_data, on_signal_failed, on_signal_received, on_signal_sent, on_started, on_timer_fired,
    stay, transition, update_state,
};

type DecideFn<D> = dyn Fn(&mut FsmContext, &HistoryEvent, &D) -> Outcome<D> + Send + Sync;

/// A function from (context, event, state data) to an [`Outcome`].
///
/// Cheap to clone; the same decider value can appear in several stacks.
pub struct Decider<D> {
    f: Arc<DecideFn<D>>,
}

impl<D> Decider<D> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut FsmContext, &HistoryEvent, &D) -> Outcome<D> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    pub fn decide(&self, ctx: &mut FsmContext, event: &HistoryEvent, data: &D) -> Outcome<D> {
        (self.f)(ctx, event, data)
    }
}

impl<D> Clone for Decider<D> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
        }
    }
}

impl<D> fmt::Debug for Decider<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decider").finish_non_exhaustive()
    }
}

/// Compose `deciders` into one, evaluated left to right for every event.
///
/// - Pass contributes nothing.
/// - Continue appends its decisions and replaces the data.
/// - Transition / Complete append theirs and return immediately, carrying every
///   decision accumulated so far.
///
/// If nothing ends the composition the result is Continue with the accumulated
/// decisions and the latest data (the input data when every rule passed).
pub fn compose<D>(deciders: impl IntoIterator<Item = Decider<D>>) -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
{
    let deciders: Vec<Decider<D>> = deciders.into_iter().collect();
    Decider::new(move |ctx, event, input| {
        let mut decisions = Vec::new();
        let mut data: Option<D> = None;

        for decider in &deciders {
            let current = data.as_ref().unwrap_or(input);
            match decider.decide(ctx, event, current) {
                Outcome::Pass => continue,
                Outcome::Continue {
                    decisions: mut contributed,
                    data: next,
                } => {
                    ctx.note_decisions(&contributed);
                    decisions.append(&mut contributed);
                    data = Some(next);
                }
                Outcome::Transition {
                    decisions: mut contributed,
                    data: next,
                    state,
                } => {
                    ctx.note_decisions(&contributed);
                    decisions.append(&mut contributed);
                    return Outcome::Transition {
                        decisions,
                        data: next,
                        state,
                    };
                }
                Outcome::Complete {
                    decisions: mut contributed,
                    data: next,
                } => {
                    ctx.note_decisions(&contributed);
                    decisions.append(&mut contributed);
                    return Outcome::Complete {
                        decisions,
                        data: next,
                    };
                }
            }
        }

        Outcome::Continue {
            decisions,
            data: data.unwrap_or_else(|| input.clone()),
        }
    })
}

/// Catch-all rule: log the unhandled event and stay.
///
/// Place it (or one like it) last in a top-level stack.
pub fn default_decider<D>() -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
{
    Decider::new(|ctx, event, data: &D| {
        tracing::info!(
            parent: ctx.span(),
            event = %event.kind(),
            event_id = event.event_id,
            state = ctx.state(),
            "unhandled event, staying"
        );
        ctx.stay(data.clone(), Vec::new())
    })
}
