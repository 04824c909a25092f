//! DecisionWorker - decision task の poll → dispatch → decide → respond ループ
//!
//! # フロー
//! 1. OrchestrationClient::poll_for_decision_task() で task 取得
//! 2. DecisionTaskDispatcher に渡す（並行度はここで決まる）
//! 3. handler 内で SnapshotStore から (state, data) を復元
//! 4. Fsm::decide() で decision を計算
//! 5. decision を返し、受理されてから snapshot を保存（完了なら削除）
//!
//! 同じ workflow の task は 3〜5 を排他で実行します。respond の直後に次の task が
//! 別の worker に渡っても、snapshot の保存が終わるまで待たせるためです。
//! 失敗（Err / panic）した task は respond_decision_task_failed で返し、
//! service に同じ event を再配送させます。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::app::fsm::Fsm;
use crate::domain::errors::HeddleError;
use crate::domain::{DecisionTask, TaskToken, WorkflowId};
use crate::ports::{
    DecisionTaskDispatcher, OrchestrationClient, SnapshotStore, TaskHandler, task_handler,
};

const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// One async lock per workflow id with a task in progress.
#[derive(Default)]
struct ExecutionLocks {
    locks: Mutex<HashMap<WorkflowId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ExecutionLocks {
    fn acquire(&self, workflow_id: &WorkflowId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(workflow_id.clone()).or_default())
    }

    /// Drop the entry once nobody else holds or waits for it.
    fn release(&self, workflow_id: &WorkflowId, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // the map and `lock` itself
        if Arc::strong_count(&lock) == 2 {
            locks.remove(workflow_id);
        }
    }
}

/// Polls one task list and decides every task with one [`Fsm`].
pub struct DecisionWorker<D> {
    task_list: String,
    identity: String,
    fsm: Arc<Fsm<D>>,
    client: Arc<dyn OrchestrationClient>,
    snapshots: Arc<dyn SnapshotStore<D>>,
    dispatcher: Arc<dyn DecisionTaskDispatcher>,
    locks: Arc<ExecutionLocks>,
}

impl<D> DecisionWorker<D>
where
    D: Clone + Default + Send + Sync + 'static,
{
    pub fn new(
        task_list: impl Into<String>,
        identity: impl Into<String>,
        fsm: Arc<Fsm<D>>,
        client: Arc<dyn OrchestrationClient>,
        snapshots: Arc<dyn SnapshotStore<D>>,
        dispatcher: Arc<dyn DecisionTaskDispatcher>,
    ) -> Self {
        Self {
            task_list: task_list.into(),
            identity: identity.into(),
            fsm,
            client,
            snapshots,
            dispatcher,
            locks: Arc::new(ExecutionLocks::default()),
        }
    }

    /// Handler that decides one task end to end.
    pub fn handler(&self) -> TaskHandler {
        let fsm = Arc::clone(&self.fsm);
        let client = Arc::clone(&self.client);
        let snapshots = Arc::clone(&self.snapshots);
        let locks = Arc::clone(&self.locks);
        task_handler(move |task| {
            let fsm = Arc::clone(&fsm);
            let client = Arc::clone(&client);
            let snapshots = Arc::clone(&snapshots);
            let locks = Arc::clone(&locks);
            async move {
                let workflow_id = task.execution.workflow_id.clone();
                let lock = locks.acquire(&workflow_id);
                let result = {
                    let _guard = lock.lock().await;
                    decide_or_fail(&fsm, client.as_ref(), snapshots.as_ref(), task).await
                };
                locks.release(&workflow_id, lock);
                result
            }
        })
    }

    /// Start the poll loop on its own tokio task.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            self.run(shutdown_rx).await;
        });
        WorkerHandle { shutdown_tx, join }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let handler = self.handler();
        tracing::info!(task_list = %self.task_list, identity = %self.identity, "decision worker started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // poll は待つ可能性があるので select で shutdown と競合させる
            let polled = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        // handle dropped
                        break;
                    }
                    continue;
                }
                polled = self.client.poll_for_decision_task(&self.task_list, &self.identity) => polled,
            };

            match polled {
                Ok(Some(task)) => {
                    let execution = task.execution.clone();
                    // failures are reported on the receipt and logged by the dispatcher
                    if let Err(e) = self.dispatcher.dispatch_task(task, Arc::clone(&handler)).await {
                        tracing::error!(%execution, error = %e, "dispatch failed, stopping worker");
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "poll for decision task failed");
                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        tracing::info!(task_list = %self.task_list, "decision worker stopped");
    }
}

/// Run [`handle_task`]; a task that errors or panics is handed back to the
/// service so its events are delivered again.
async fn decide_or_fail<D>(
    fsm: &Fsm<D>,
    client: &dyn OrchestrationClient,
    snapshots: &dyn SnapshotStore<D>,
    task: DecisionTask,
) -> Result<(), HeddleError>
where
    D: Clone + Default + Send + Sync + 'static,
{
    let token = task.task_token.clone();
    let result = AssertUnwindSafe(handle_task(fsm, client, snapshots, task))
        .catch_unwind()
        .await;
    match result {
        Ok(Ok(())) => Ok(()),
        // the service already released the task
        Ok(Err(e @ HeddleError::DecisionRejected(_))) => Err(e),
        Ok(Err(e)) => {
            report_failed(client, &token, &e.to_string()).await;
            Err(e)
        }
        Err(panic) => {
            report_failed(client, &token, "decider panicked").await;
            std::panic::resume_unwind(panic)
        }
    }
}

async fn report_failed(client: &dyn OrchestrationClient, token: &TaskToken, cause: &str) {
    if let Err(e) = client.respond_decision_task_failed(token, cause).await {
        tracing::debug!(task_token = %token, error = %e, "could not report failed decision task");
    }
}

async fn handle_task<D>(
    fsm: &Fsm<D>,
    client: &dyn OrchestrationClient,
    snapshots: &dyn SnapshotStore<D>,
    task: DecisionTask,
) -> Result<(), HeddleError>
where
    D: Clone + Default + Send + Sync + 'static,
{
    let workflow_id = task.execution.workflow_id.clone();
    let snapshot = snapshots.load(&workflow_id).await?;
    let decided = fsm.decide(&task, snapshot)?;

    tracing::debug!(
        execution = %task.execution,
        state = %decided.snapshot.state,
        decisions = decided.decisions.len(),
        completed = decided.completed,
        "decision task decided"
    );

    // the snapshot only moves once the service has taken the decisions
    client
        .respond_decision_task_completed(&task.task_token, decided.decisions)
        .await?;
    if decided.completed {
        snapshots.remove(&workflow_id).await
    } else {
        snapshots.save(&workflow_id, decided.snapshot).await
    }
}

/// Handle to a running [`DecisionWorker`].
/// - `request_shutdown()` で新しい poll を止める（処理中の task はキャンセルしない）
/// - `shutdown_and_join()` で終了を待てる
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::fsm::FsmBuilder;
    use crate::decider::{
        Decider, FsmContext, compose, default_decider, managed_continuations, on_signal_received,
        update_state,
    };
    use crate::domain::{
        ContinuationConfig, Decision, EventAttributes, EventKind, HistoryEvent, Snapshot,
        WorkflowId, WorkflowType,
    };
    use crate::impls::{InMemoryOrchestrator, InMemorySnapshotStore, InlineDispatcher, SpawnDispatcher};

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Counter {
        count: u32,
    }

    fn counter_fsm(history_size: i64) -> Arc<Fsm<Counter>> {
        let counting = compose(vec![
            on_signal_received("increment", vec![update_state(|_, _, c: &mut Counter| c.count += 1)]),
            on_signal_received("boom", vec![update_state(|_, _, _: &mut Counter| panic!("boom"))]),
            on_signal_received(
                "stop",
                vec![Decider::new(|ctx: &mut FsmContext, _: &HistoryEvent, c: &Counter| {
                    ctx.complete_with(c.clone(), vec![Decision::complete_workflow(Some(c.count.to_string()))])
                })],
            ),
            managed_continuations(&ContinuationConfig::new(history_size, 5)),
            default_decider(),
        ]);
        Arc::new(
            FsmBuilder::new()
                .name("counter")
                .state("counting", counting)
                .initial_state("counting")
                .build()
                .unwrap(),
        )
    }

    async fn eventually<F, Fut>(what: &str, mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..400 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    async fn count(store: &InMemorySnapshotStore<Counter>, wf: &WorkflowId) -> Option<u32> {
        store.load(wf).await.unwrap().map(|s| s.data.count)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn long_running_counter_continues_as_new() {
        let orchestrator = Arc::new(
            InMemoryOrchestrator::default().with_poll_timeout(Duration::from_millis(20)),
        );
        let store = InMemorySnapshotStore::<Counter>::new();
        let worker = DecisionWorker::new(
            "decisions",
            "test-worker",
            counter_fsm(10),
            orchestrator.clone(),
            Arc::new(store.clone()),
            Arc::new(InlineDispatcher::new()),
        )
        .spawn();

        let wf = WorkflowId::new("counter-1");
        orchestrator
            .start_workflow(WorkflowType::new("counter", "1"), wf.clone(), None)
            .unwrap();

        for expected in 1..=6u32 {
            orchestrator.signal_workflow(&wf, "increment", None).unwrap();
            eventually("increment to be applied", || {
                let (store, wf) = (store.clone(), wf.clone());
                async move { count(&store, &wf).await == Some(expected) }
            })
            .await;
        }

        eventually("a continued run", || {
            let (orchestrator, wf) = (orchestrator.clone(), wf.clone());
            async move { orchestrator.run_ids(&wf).unwrap().len() > 1 }
        })
        .await;
        assert!(orchestrator.is_open(&wf).unwrap());
        assert_eq!(count(&store, &wf).await, Some(6));

        worker.shutdown_and_join().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn completion_removes_snapshot() {
        let orchestrator = Arc::new(
            InMemoryOrchestrator::default().with_poll_timeout(Duration::from_millis(20)),
        );
        let store = InMemorySnapshotStore::<Counter>::new();
        let worker = DecisionWorker::new(
            "decisions",
            "test-worker",
            counter_fsm(1_000),
            orchestrator.clone(),
            Arc::new(store.clone()),
            Arc::new(SpawnDispatcher::new()),
        )
        .spawn();

        let wf = WorkflowId::new("counter-2");
        orchestrator
            .start_workflow(WorkflowType::new("counter", "1"), wf.clone(), None)
            .unwrap();
        eventually("first snapshot", || {
            let (store, wf) = (store.clone(), wf.clone());
            async move { count(&store, &wf).await == Some(0) }
        })
        .await;

        orchestrator.signal_workflow(&wf, "stop", None).unwrap();
        eventually("workflow to close", || {
            let (orchestrator, wf) = (orchestrator.clone(), wf.clone());
            async move { !orchestrator.is_open(&wf).unwrap() }
        })
        .await;
        assert!(store.load(&wf).await.unwrap().is_none());

        worker.shutdown_and_join().await;
    }

    fn orchestrator() -> Arc<InMemoryOrchestrator> {
        Arc::new(InMemoryOrchestrator::default().with_poll_timeout(Duration::from_millis(20)))
    }

    fn worker(
        orchestrator: &Arc<InMemoryOrchestrator>,
        store: &InMemorySnapshotStore<Counter>,
    ) -> DecisionWorker<Counter> {
        DecisionWorker::new(
            "decisions",
            "test-worker",
            counter_fsm(1_000),
            orchestrator.clone(),
            Arc::new(store.clone()),
            Arc::new(InlineDispatcher::new()),
        )
    }

    async fn next_task(orchestrator: &InMemoryOrchestrator) -> DecisionTask {
        orchestrator
            .poll_for_decision_task("decisions", "test")
            .await
            .unwrap()
            .expect("a decision task")
    }

    async fn decide_next(
        orchestrator: &InMemoryOrchestrator,
        worker: &DecisionWorker<Counter>,
    ) -> Result<(), HeddleError> {
        let task = next_task(orchestrator).await;
        (worker.handler())(task).await
    }

    #[tokio::test]
    async fn rejected_close_keeps_state_and_is_decided_again() {
        let orchestrator = orchestrator();
        let store = InMemorySnapshotStore::<Counter>::new();
        let worker = worker(&orchestrator, &store);
        let wf = WorkflowId::new("counter-3");
        orchestrator
            .start_workflow(WorkflowType::new("counter", "1"), wf.clone(), None)
            .unwrap();
        decide_next(&orchestrator, &worker).await.unwrap();
        for _ in 0..3 {
            orchestrator.signal_workflow(&wf, "increment", None).unwrap();
            decide_next(&orchestrator, &worker).await.unwrap();
        }

        orchestrator.signal_workflow(&wf, "stop", None).unwrap();
        let task = next_task(&orchestrator).await;
        // arrives while the stop task is being decided
        orchestrator.signal_workflow(&wf, "increment", None).unwrap();
        let err = (worker.handler())(task).await.unwrap_err();
        assert!(matches!(err, HeddleError::DecisionRejected(_)));
        assert_eq!(count(&store, &wf).await, Some(3));
        assert!(orchestrator.is_open(&wf).unwrap());

        decide_next(&orchestrator, &worker).await.unwrap();
        assert!(!orchestrator.is_open(&wf).unwrap());
        let history = orchestrator.history(&wf).unwrap();
        let closed = history.last().map(|e| &e.attributes);
        assert!(matches!(
            closed,
            Some(EventAttributes::WorkflowExecutionCompleted { result: Some(r) }) if r == "3"
        ));
        assert!(store.load(&wf).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_task_is_handed_back_and_delivered_again() {
        let orchestrator = orchestrator();
        let store = InMemorySnapshotStore::<Counter>::new();
        let wf = WorkflowId::new("counter-4");
        store
            .save(&wf, Snapshot::new("vanished", Counter::default()))
            .await
            .unwrap();
        let worker = worker(&orchestrator, &store);
        orchestrator
            .start_workflow(WorkflowType::new("counter", "1"), wf.clone(), None)
            .unwrap();

        let err = decide_next(&orchestrator, &worker).await.unwrap_err();
        assert!(matches!(err, HeddleError::UnknownState { .. }));

        store
            .save(&wf, Snapshot::new("counting", Counter { count: 7 }))
            .await
            .unwrap();
        let task = next_task(&orchestrator).await;
        assert_eq!(task.previous_started_event_id, 0);
        assert!(task.events.iter().any(|e| e.kind() == EventKind::DecisionTaskFailed));
        (worker.handler())(task).await.unwrap();
        assert_eq!(count(&store, &wf).await, Some(7));
    }

    #[tokio::test]
    async fn panicking_decider_hands_the_task_back() {
        let orchestrator = orchestrator();
        let store = InMemorySnapshotStore::<Counter>::new();
        let worker = worker(&orchestrator, &store);
        let wf = WorkflowId::new("counter-5");
        orchestrator
            .start_workflow(WorkflowType::new("counter", "1"), wf.clone(), None)
            .unwrap();
        decide_next(&orchestrator, &worker).await.unwrap();

        orchestrator.signal_workflow(&wf, "boom", None).unwrap();
        let task = next_task(&orchestrator).await;
        let panicked = AssertUnwindSafe((worker.handler())(task)).catch_unwind().await;
        assert!(panicked.is_err());

        let task = next_task(&orchestrator).await;
        assert!(task.new_events().any(|e| e.signal_name() == Some("boom")));
    }
}
