//! Managed continuations - history を有限に保つ組み込み decider
//!
//! 3 つのルールを順に評価します:
//! 1. continue timer が fire → 未解決の work が無ければ continue-as-new、
//!    あれば retry timer を張り直す
//! 2. continue signal を受信 → 1 と同じ判定
//! 3. event id が history_size を超えた → 自分自身に continue signal を送る
//!
//! 3 は早めに何度でも発火し、実際の continue は 1/2 が work の無い時だけ行います。
//! スタックの最後に置いて全 event を観測させてください。

use crate::domain::config::{CONTINUE_SIGNAL, CONTINUE_TIMER, ContinuationConfig};
use crate::domain::{Decision, EventKind, HistoryEvent, Outcome};

use super::{Decider, FsmContext, compose};

pub fn managed_continuations<D>(config: &ContinuationConfig) -> Decider<D>
where
    D: Clone + Send + Sync + 'static,
{
    let timer = {
        let config = config.clone();
        Decider::new(move |ctx, event: &HistoryEvent, data: &D| {
            if event.kind() != EventKind::TimerFired || event.timer_id() != Some(CONTINUE_TIMER) {
                return Outcome::Pass;
            }
            ctx.trace("continuation-timer");
            continue_or_retry(ctx, &config, data)
        })
    };

    let signal = {
        let config = config.clone();
        Decider::new(move |ctx, event: &HistoryEvent, data: &D| {
            if event.signal_name() != Some(CONTINUE_SIGNAL) {
                return Outcome::Pass;
            }
            ctx.trace("continuation-signal");
            continue_or_retry(ctx, &config, data)
        })
    };

    let history_size = config.history_size;
    let threshold = Decider::new(move |ctx, event: &HistoryEvent, data: &D| {
        if event.event_id <= history_size {
            return Outcome::Pass;
        }
        tracing::debug!(
            parent: ctx.span(),
            event_id = event.event_id,
            history_size,
            "history over threshold, signalling continuation"
        );
        let decision = Decision::signal_external(
            ctx.workflow_id().clone(),
            Some(ctx.run_id().clone()),
            CONTINUE_SIGNAL,
        );
        ctx.stay(data.clone(), vec![decision])
    });

    compose(vec![timer, signal, threshold])
}

fn continue_or_retry<D: Clone>(ctx: &FsmContext, config: &ContinuationConfig, data: &D) -> Outcome<D> {
    if ctx.has_outstanding_work(config.pending_work) {
        tracing::debug!(
            parent: ctx.span(),
            retry_secs = config.timer_retry_seconds,
            "outstanding work, deferring continuation"
        );
        let retry = Decision::start_timer(CONTINUE_TIMER, config.timer_retry());
        return ctx.stay(data.clone(), vec![retry]);
    }
    tracing::info!(parent: ctx.span(), state = ctx.state(), "continuing as new");
    let decision = ctx.continue_workflow_decision(ctx.state());
    ctx.stay(data.clone(), vec![decision])
}
