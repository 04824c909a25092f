//! OrchestrationClient port - orchestration service への窓口
//!
//! decision task を long-poll で受け取り、decision のリストを返します。
//! 処理できなかった task は failed として返し、service に再配送させます。
//! history の正本は service 側にあり、worker は読むだけです。

use async_trait::async_trait;

use crate::domain::errors::HeddleError;
use crate::domain::{Decision, DecisionTask, TaskToken};

/// The two calls a decision worker needs from the orchestration service.
#[async_trait]
pub trait OrchestrationClient: Send + Sync {
    /// Wait for the next decision task on `task_list`.
    ///
    /// `Ok(None)` means the poll timed out with nothing to do.
    async fn poll_for_decision_task(
        &self,
        task_list: &str,
        identity: &str,
    ) -> Result<Option<DecisionTask>, HeddleError>;

    /// Complete the decision task identified by `task_token` with `decisions`.
    async fn respond_decision_task_completed(
        &self,
        task_token: &TaskToken,
        decisions: Vec<Decision>,
    ) -> Result<(), HeddleError>;

    /// Give up on the decision task identified by `task_token`.
    ///
    /// None of its decisions are applied and the service schedules a new task
    /// that delivers the same events again.
    async fn respond_decision_task_failed(
        &self,
        task_token: &TaskToken,
        cause: &str,
    ) -> Result<(), HeddleError>;
}
