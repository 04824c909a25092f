//! Domain identifiers (strongly-typed IDs).
//!
//! # Phantom Type パターン
//! orchestration service から渡される ID はすべて文字列ですが、
//! `Id<T>` のマーカー型で WorkflowId / RunId / ActivityId / TaskToken を
//! コンパイル時に区別します。
//!
//! ## 生成
//! worker 側で ID を作る必要がある場合（in-memory service の run_id、task token など）は
//! ULID を使います。時刻でソート可能で、分散環境でも調整なしで生成できます。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// `generate()` で使うプレフィックス（"run-", "token-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は PhantomData で、実行時にはメモリを消費しません。
///
/// # 例
/// ```ignore
/// let workflow_id = WorkflowId::new("order-42");
/// let run_id = RunId::generate();
/// // let _: WorkflowId = run_id; // <- does not compile
/// ```
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    /// ULID ベースの新しい ID を生成
    pub fn generate() -> Self {
        Self::new(format!("{}{}", T::prefix(), Ulid::new()))
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

// derive だと T にも Clone/PartialEq などを要求してしまうので手書きする

impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self::new(self.value.clone())
    }
}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T: IdMarker> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: IdMarker> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T: IdMarker> From<&str> for Id<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> From<String> for Id<T> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Workflow {}

impl IdMarker for Workflow {
    fn prefix() -> &'static str {
        "wf-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Run {}

impl IdMarker for Run {
    fn prefix() -> &'static str {
        "run-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Activity {}

impl IdMarker for Activity {
    fn prefix() -> &'static str {
        "activity-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Token {}

impl IdMarker for Token {
    fn prefix() -> &'static str {
        "token-"
    }
}

/// Identifier of a workflow execution chain (stable across continue-as-new).
pub type WorkflowId = Id<Workflow>;

/// Identifier of one run of a workflow execution.
pub type RunId = Id<Run>;

/// Identifier of a scheduled activity (unit of work).
pub type ActivityId = Id<Activity>;

/// Opaque token identifying one delivered decision task.
pub type TaskToken = Id<Token>;
