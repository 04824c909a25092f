//! DecisionTaskDispatcher port - decision task の並行度ポリシー
//!
//! 「task が届いた」と「何件を同時に処理するか」を切り離します。
//! handler は dispatch された task ごとにちょうど 1 回呼ばれます。
//!
//! handler の失敗（Err / panic）は dispatcher では retry も握りつぶしもせず、
//! その task の `TaskReceipt` に届けます。他の task や dispatcher 自体は止まりません。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::domain::DecisionTask;
use crate::domain::errors::HeddleError;

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), HeddleError>> + Send>>;

/// Handles one decision task. Shared by every task dispatched with it.
pub type TaskHandler = Arc<dyn Fn(DecisionTask) -> TaskFuture + Send + Sync>;

/// Wrap an async fn/closure as a [`TaskHandler`].
pub fn task_handler<F, Fut>(f: F) -> TaskHandler
where
    F: Fn(DecisionTask) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HeddleError>> + Send + 'static,
{
    Arc::new(move |task| Box::pin(f(task)))
}

/// Why a dispatched handler did not complete successfully.
#[derive(Debug, Error)]
pub enum HandlerFailure {
    #[error("handler failed: {0}")]
    Failed(#[source] HeddleError),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("handler was dropped before it completed")]
    Dropped,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatcher is shut down")]
    Closed,
}

/// Per-task result channel, resolved once the handler has run.
#[derive(Debug)]
pub struct TaskReceipt {
    rx: oneshot::Receiver<Result<(), HandlerFailure>>,
}

impl TaskReceipt {
    pub(crate) fn new(rx: oneshot::Receiver<Result<(), HandlerFailure>>) -> Self {
        Self { rx }
    }

    /// Wait for the handler's result.
    pub async fn outcome(self) -> Result<(), HandlerFailure> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(HandlerFailure::Dropped),
        }
    }

    /// The handler's result, if it has already run.
    pub fn try_outcome(mut self) -> Result<Result<(), HandlerFailure>, Self> {
        match self.rx.try_recv() {
            Ok(result) => Ok(result),
            Err(TryRecvError::Closed) => Ok(Err(HandlerFailure::Dropped)),
            Err(TryRecvError::Empty) => Err(self),
        }
    }
}

#[async_trait]
pub trait DecisionTaskDispatcher: Send + Sync {
    /// Hand `task` to `handler` according to this dispatcher's policy.
    async fn dispatch_task(
        &self,
        task: DecisionTask,
        handler: TaskHandler,
    ) -> Result<TaskReceipt, DispatchError>;
}
