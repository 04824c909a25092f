//! State - 論理状態名 + state data のスナップショット
//!
//! decision task をまたいで引き継がれるのはこの組だけです。
//! 永続化・シリアライズの方法は SnapshotStore 側の責務です。

use serde::{Deserialize, Serialize};

/// Logical state name plus the user-defined state data, as of the end of the
/// last decision task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<D> {
    pub state: String,
    pub data: D,
}

impl<D> Snapshot<D> {
    pub fn new(state: impl Into<String>, data: D) -> Self {
        Self {
            state: state.into(),
            data,
        }
    }
}
