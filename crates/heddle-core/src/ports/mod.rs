//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（orchestration service, 管理 API, state の保存先）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - history の正本は orchestration service 側
//! - worker は decision task ごとに state を再構築する
//! - 並行度は dispatcher だけが決める

pub mod clock;
pub mod dispatch;
pub mod orchestration;
pub mod registration;
pub mod snapshot;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::dispatch::{
    DecisionTaskDispatcher, DispatchError, HandlerFailure, TaskFuture, TaskHandler, TaskReceipt,
    task_handler,
};
pub use self::orchestration::OrchestrationClient;
pub use self::registration::{AdminError, RegistrationClient};
pub use self::snapshot::SnapshotStore;
