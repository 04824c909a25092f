//! Dispatchers - DecisionTaskDispatcher の 3 つのポリシー
//!
//! - **InlineDispatcher**: 呼び出し元でそのまま await（並行なし・順序厳密）
//! - **SpawnDispatcher**: task ごとに tokio::spawn（上限なし・順序なし）
//! - **BoundedDispatcher**: N 個の常駐 worker が共有キューから取り出す
//!
//! どのポリシーでも handler は `run_isolated` 経由で実行され、
//! Err も panic もその task の receipt に届きます。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::domain::{DecisionTask, DispatcherConfig};
use crate::ports::{DecisionTaskDispatcher, DispatchError, HandlerFailure, TaskHandler, TaskReceipt};

/// Run one handler, turning an error or a panic into a [`HandlerFailure`].
async fn run_isolated(task: DecisionTask, handler: &TaskHandler) -> Result<(), HandlerFailure> {
    let token = task.task_token.clone();
    let handler = Arc::clone(handler);
    let run = AssertUnwindSafe(async move { handler(task).await }).catch_unwind();

    match run.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            tracing::warn!(task_token = %token, error = %err, "decision task handler failed");
            Err(HandlerFailure::Failed(err))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(task_token = %token, panic = %message, "decision task handler panicked");
            Err(HandlerFailure::Panicked(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ----------------------------------------------------------------------
// inline
// ----------------------------------------------------------------------

/// Handles each task on the caller before `dispatch_task` returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl InlineDispatcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DecisionTaskDispatcher for InlineDispatcher {
    async fn dispatch_task(
        &self,
        task: DecisionTask,
        handler: TaskHandler,
    ) -> Result<TaskReceipt, DispatchError> {
        let (tx, rx) = oneshot::channel();
        let result = run_isolated(task, &handler).await;
        let _ = tx.send(result);
        Ok(TaskReceipt::new(rx))
    }
}

// ----------------------------------------------------------------------
// spawn
// ----------------------------------------------------------------------

/// One tokio task per decision task, no limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpawnDispatcher;

impl SpawnDispatcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DecisionTaskDispatcher for SpawnDispatcher {
    async fn dispatch_task(
        &self,
        task: DecisionTask,
        handler: TaskHandler,
    ) -> Result<TaskReceipt, DispatchError> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = run_isolated(task, &handler).await;
            // receiver may be gone; the result was already logged
            let _ = tx.send(result);
        });
        Ok(TaskReceipt::new(rx))
    }
}

// ----------------------------------------------------------------------
// bounded pool
// ----------------------------------------------------------------------

struct Job {
    task: DecisionTask,
    handler: TaskHandler,
    reply: oneshot::Sender<Result<(), HandlerFailure>>,
}

/// Fixed pool of workers fed from a bounded queue.
///
/// `dispatch_task` waits while the queue is full. Must be created inside a
/// tokio runtime.
pub struct BoundedDispatcher {
    tx: mpsc::Sender<Job>,
    joins: Vec<JoinHandle<()>>,
}

impl BoundedDispatcher {
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let joins = (0..workers)
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    pool_worker(worker_id, rx).await;
                })
            })
            .collect();

        Self { tx, joins }
    }

    pub fn workers(&self) -> usize {
        self.joins.len()
    }

    /// Close the queue and wait for the workers to drain it.
    pub async fn shutdown_and_join(self) {
        drop(self.tx);
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn pool_worker(worker_id: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        // lock is only held while waiting for the next job
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            tracing::debug!(worker_id, "dispatch queue closed, worker exiting");
            break;
        };

        let result = run_isolated(job.task, &job.handler).await;
        let _ = job.reply.send(result);
    }
}

#[async_trait]
impl DecisionTaskDispatcher for BoundedDispatcher {
    async fn dispatch_task(
        &self,
        task: DecisionTask,
        handler: TaskHandler,
    ) -> Result<TaskReceipt, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job {
                task,
                handler,
                reply,
            })
            .await
            .map_err(|_| DispatchError::Closed)?;
        Ok(TaskReceipt::new(rx))
    }
}

/// Build the dispatcher a [`DispatcherConfig`] names.
pub fn dispatcher_from_config(config: &DispatcherConfig) -> Arc<dyn DecisionTaskDispatcher> {
    match config {
        DispatcherConfig::Inline => Arc::new(InlineDispatcher::new()),
        DispatcherConfig::Spawn => Arc::new(SpawnDispatcher::new()),
        DispatcherConfig::Bounded {
            workers,
            queue_capacity,
        } => Arc::new(BoundedDispatcher::new(*workers, *queue_capacity)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::HeddleError;
    use crate::domain::{RunId, TaskToken, WorkflowExecution, WorkflowId, WorkflowType};
    use crate::ports::task_handler;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn task(n: usize) -> DecisionTask {
        DecisionTask {
            task_token: TaskToken::new(format!("token-{n}")),
            workflow_type: WorkflowType::new("test", "1"),
            execution: WorkflowExecution::new(
                WorkflowId::new(format!("wf-{n}")),
                RunId::new("run-1"),
            ),
            events: Vec::new(),
            previous_started_event_id: 0,
            started_event_id: 0,
        }
    }

    fn counting(count: Arc<AtomicUsize>) -> TaskHandler {
        task_handler(move |_task| {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok::<_, HeddleError>(())
            }
        })
    }

    async fn explode(_task: DecisionTask) -> Result<(), HeddleError> {
        panic!("boom")
    }

    async fn throttled(_task: DecisionTask) -> Result<(), HeddleError> {
        Err(HeddleError::Service("throttled".into()))
    }

    async fn dispatch_many(dispatcher: &dyn DecisionTaskDispatcher, n: usize) -> usize {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = counting(Arc::clone(&count));
        let mut receipts = Vec::with_capacity(n);
        for i in 0..n {
            receipts.push(dispatcher.dispatch_task(task(i), Arc::clone(&handler)).await.unwrap());
        }
        for receipt in receipts {
            receipt.outcome().await.unwrap();
        }
        count.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn inline_handles_before_returning() {
        let done = Arc::new(AtomicBool::new(false));
        let handler = {
            let done = Arc::clone(&done);
            task_handler(move |_task| {
                let done = Arc::clone(&done);
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    done.store(true, Ordering::SeqCst);
                    Ok::<_, HeddleError>(())
                }
            })
        };

        let receipt = InlineDispatcher::new().dispatch_task(task(0), handler).await.unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert!(matches!(receipt.try_outcome(), Ok(Ok(()))));
    }

    #[tokio::test]
    async fn every_policy_handles_every_task_once() {
        let n = 1000;
        let within = Duration::from_secs(10);

        let inline = InlineDispatcher::new();
        let spawn = SpawnDispatcher::new();
        let bounded = BoundedDispatcher::new(10, 16);

        for dispatcher in [
            &inline as &dyn DecisionTaskDispatcher,
            &spawn as &dyn DecisionTaskDispatcher,
            &bounded as &dyn DecisionTaskDispatcher,
        ] {
            let handled = tokio::time::timeout(within, dispatch_many(dispatcher, n))
                .await
                .expect("dispatch timed out");
            assert_eq!(handled, n);
        }
        bounded.shutdown_and_join().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn bounded_pool_never_exceeds_worker_count() {
        let workers = 3;
        let dispatcher = BoundedDispatcher::new(workers, 4);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handled = Arc::new(AtomicUsize::new(0));

        let handler = {
            let (running, peak, handled) =
                (Arc::clone(&running), Arc::clone(&peak), Arc::clone(&handled));
            task_handler(move |_task| {
                let (running, peak, handled) =
                    (Arc::clone(&running), Arc::clone(&peak), Arc::clone(&handled));
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    handled.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, HeddleError>(())
                }
            })
        };

        let mut receipts = Vec::new();
        for i in 0..60 {
            receipts.push(dispatcher.dispatch_task(task(i), Arc::clone(&handler)).await.unwrap());
        }
        for receipt in receipts {
            receipt.outcome().await.unwrap();
        }

        assert_eq!(handled.load(Ordering::SeqCst), 60);
        assert!(peak.load(Ordering::SeqCst) <= workers);
        assert!(peak.load(Ordering::SeqCst) >= 1);
        dispatcher.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn failures_are_reported_and_workers_survive() {
        let dispatcher = BoundedDispatcher::new(1, 4);

        let panicking = task_handler(explode);
        let failing = task_handler(throttled);
        let count = Arc::new(AtomicUsize::new(0));

        let panicked = dispatcher.dispatch_task(task(1), panicking).await.unwrap();
        let failed = dispatcher.dispatch_task(task(2), failing).await.unwrap();
        let ok = dispatcher
            .dispatch_task(task(3), counting(Arc::clone(&count)))
            .await
            .unwrap();

        match panicked.outcome().await {
            Err(HandlerFailure::Panicked(message)) => assert!(message.contains("boom")),
            other => panic!("expected panic failure, got {other:?}"),
        }
        assert!(matches!(
            failed.outcome().await,
            Err(HandlerFailure::Failed(HeddleError::Service(_)))
        ));
        ok.outcome().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        dispatcher.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn spawn_isolates_panics() {
        let dispatcher = SpawnDispatcher::new();
        let receipt = dispatcher
            .dispatch_task(task(0), task_handler(explode))
            .await
            .unwrap();
        assert!(matches!(receipt.outcome().await, Err(HandlerFailure::Panicked(_))));
    }

    #[tokio::test]
    async fn shutdown_drains_queued_work() {
        let dispatcher = BoundedDispatcher::new(2, 32);
        let count = Arc::new(AtomicUsize::new(0));
        let handler = counting(Arc::clone(&count));
        for i in 0..20 {
            let _receipt = dispatcher.dispatch_task(task(i), Arc::clone(&handler)).await.unwrap();
        }
        dispatcher.shutdown_and_join().await;
        assert_eq!(count.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn config_selects_policy() {
        let d = dispatcher_from_config(&DispatcherConfig::Inline);
        assert_eq!(dispatch_many(d.as_ref(), 5).await, 5);

        let d = dispatcher_from_config(&DispatcherConfig::Bounded {
            workers: 2,
            queue_capacity: 2,
        });
        assert_eq!(dispatch_many(d.as_ref(), 5).await, 5);
    }
}
