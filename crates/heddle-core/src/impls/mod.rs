//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InlineDispatcher / SpawnDispatcher / BoundedDispatcher**: decision task の実行方針
//! - **InMemoryOrchestrator**: 開発用の orchestration service
//! - **InMemorySnapshotStore**: 開発用の snapshot 保存先
//! - **InMemoryRegistrationClient**: 開発用の管理 API

pub mod dispatch;
pub mod inmem_orchestrator;
pub mod inmem_registry;
pub mod inmem_snapshot;

// 主要な型を再エクスポート
pub use self::dispatch::{BoundedDispatcher, InlineDispatcher, SpawnDispatcher, dispatcher_from_config};
pub use self::inmem_orchestrator::InMemoryOrchestrator;
pub use self::inmem_registry::InMemoryRegistrationClient;
pub use self::inmem_snapshot::InMemorySnapshotStore;
