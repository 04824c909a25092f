//! Errors - エラー型と分類
//!
//! 運用上の分類（ErrorKind）を持たせ、呼び出し側が retry するかどうかを判断できるようにします。

use thiserror::Error;

use super::ids::{TaskToken, WorkflowId};

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（リトライ無意味）
/// - Configuration: 起動時の設定ミス（fail-fast）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Configuration,
}

/// HeddleError はランタイムのドメインエラー
#[derive(Debug, Error)]
pub enum HeddleError {
    #[error("state '{state}' is not registered for workflow {workflow}")]
    UnknownState { workflow: String, state: String },

    #[error("unknown workflow execution: {0}")]
    UnknownExecution(WorkflowId),

    #[error("unknown or expired task token: {0}")]
    UnknownTaskToken(TaskToken),

    #[error("decision task rejected: {0}")]
    DecisionRejected(String),

    #[error("orchestration service error: {0}")]
    Service(String),

    #[error("snapshot store error: {0}")]
    Snapshot(String),

    #[error("{0}")]
    Other(String),
}

impl HeddleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HeddleError::UnknownState { .. } => ErrorKind::Configuration,
            HeddleError::DecisionRejected(_)
            | HeddleError::Service(_)
            | HeddleError::Snapshot(_) => ErrorKind::Transient,
            HeddleError::UnknownExecution(_)
            | HeddleError::UnknownTaskToken(_)
            | HeddleError::Other(_) => ErrorKind::Permanent,
        }
    }
}
