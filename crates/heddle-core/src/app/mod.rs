//! App - アプリケーション層
//!
//! このモジュールは、ports と decider を組み合わせて worker を組み立てます。
//!
//! # 主要コンポーネント
//! - **FsmBuilder / Fsm**: state ごとの decider と decision task の再生
//! - **DecisionWorker**: poll → dispatch → decide → respond ループ
//! - **Migrator**: domain / type / stream の冪等な登録

pub mod fsm;
pub mod migrator;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::fsm::{BuildError, Decided, Fsm, FsmBuilder};
pub use self::migrator::{MigrationReport, Migrator};
pub use self::worker_loop::{DecisionWorker, WorkerHandle};
