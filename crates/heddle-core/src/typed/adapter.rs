//! Typed adapter - payload 型を固定した building block
//!
//! 各メソッドは受け取った callback をそのまま返すだけですが、
//! 引数の数・型（payload 型を含む）・戻り値の型が期待する形と一致しないと
//! コンパイルが通りません。チェックは構築時（= コンパイル時）の一度だけで、
//! 呼び出しごとの検査はありません。

use std::fmt;
use std::marker::PhantomData;

use crate::decider::{Decider, FsmContext};
use crate::domain::{Decision, HistoryEvent, Outcome};

/// Builds deciders and building blocks over the payload type `D`.
///
/// ```
/// use heddle_core::decider::{add_decision, compose, on_data, update_state};
/// use heddle_core::domain::Decision;
/// use heddle_core::typed::Typed;
///
/// #[derive(Debug, Clone, Default)]
/// struct Counter {
///     count: u32,
/// }
///
/// let t = Typed::<Counter>::new();
/// let bump = update_state(t.state_func(|_, _, c: &mut Counter| c.count += 1));
/// let done = on_data(
///     t.predicate_func(|c: &Counter| c.count >= 3),
///     vec![add_decision(t.decision_func(|_, _, _: &Counter| {
///         Decision::complete_workflow(None)
///     }))],
/// );
/// let _stack = compose(vec![bump, done]);
/// ```
///
/// A callback over a different payload type is rejected:
///
/// ```compile_fail
/// use heddle_core::domain::Decision;
/// use heddle_core::typed::Typed;
///
/// #[derive(Clone)]
/// struct Counter;
/// #[derive(Clone)]
/// struct Invoice;
///
/// let t = Typed::<Counter>::new();
/// let _ = t.decision_func(|_, _, _: &Invoice| Decision::complete_workflow(None));
/// ```
///
/// So is a callback with the wrong arity:
///
/// ```compile_fail
/// use heddle_core::domain::Decision;
/// use heddle_core::typed::Typed;
///
/// #[derive(Clone)]
/// struct Counter;
///
/// let t = Typed::<Counter>::new();
/// let _ = t.multi_decision_func(|_, _| vec![Decision::complete_workflow(None)]);
/// ```
///
/// Or the wrong return type:
///
/// ```compile_fail
/// use heddle_core::typed::Typed;
///
/// #[derive(Clone)]
/// struct Counter {
///     count: u32,
/// }
///
/// let t = Typed::<Counter>::new();
/// let _ = t.predicate_func(|c: &Counter| c.count);
/// ```
pub struct Typed<D> {
    _payload: PhantomData<fn() -> D>,
}

impl<D> Typed<D>
where
    D: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            _payload: PhantomData,
        }
    }

    /// Full decider over `D`.
    pub fn decider<F>(&self, f: F) -> Decider<D>
    where
        F: Fn(&mut FsmContext, &HistoryEvent, &D) -> Outcome<D> + Send + Sync + 'static,
    {
        Decider::new(f)
    }

    /// Callback for [`add_decision`](crate::decider::add_decision).
    pub fn decision_func<F>(&self, f: F) -> F
    where
        F: Fn(&FsmContext, &HistoryEvent, &D) -> Decision + Send + Sync + 'static,
    {
        f
    }

    /// Callback for [`add_decisions`](crate::decider::add_decisions).
    pub fn multi_decision_func<F>(&self, f: F) -> F
    where
        F: Fn(&FsmContext, &HistoryEvent, &D) -> Vec<Decision> + Send + Sync + 'static,
    {
        f
    }

    /// Callback for [`update_state`](crate::decider::update_state).
    pub fn state_func<F>(&self, f: F) -> F
    where
        F: Fn(&FsmContext, &HistoryEvent, &mut D) + Send + Sync + 'static,
    {
        f
    }

    /// Predicate for [`on_data`](crate::decider::on_data).
    pub fn predicate_func<F>(&self, f: F) -> F
    where
        F: Fn(&D) -> bool + Send + Sync + 'static,
    {
        f
    }
}

impl<D> Default for Typed<D>
where
    D: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<D> Clone for Typed<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for Typed<D> {}

impl<D> fmt::Debug for Typed<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Typed<{}>", std::any::type_name::<D>())
    }
}
