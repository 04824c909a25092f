//! Domain model (IDs, history, decisions, outcomes, config, ...).
//!
//! ドメイン層は I/O を持ちません:
//! - history: ids, event, task
//! - decider の語彙: decision, outcome, state
//! - 運用: errors, config, registration

pub mod config;
pub mod decision;
pub mod errors;
pub mod event;
pub mod ids;
pub mod outcome;
pub mod registration;
pub mod state;
pub mod task;

pub use config::{
    CONTINUE_SIGNAL, CONTINUE_TIMER, ConfigError, ContinuationConfig, DispatcherConfig,
    PendingWorkPolicy, WorkerConfig,
};
pub use decision::Decision;
pub use errors::{ErrorKind, HeddleError};
pub use event::{EventAttributes, EventKind, HistoryEvent};
pub use ids::{ActivityId, RunId, TaskToken, WorkflowId};
pub use outcome::Outcome;
pub use registration::{
    ActivityTypeRegistration, DomainRegistration, StreamRegistration, StreamStatus, TypeRef,
    WorkflowTypeRegistration,
};
pub use state::Snapshot;
pub use task::{DecisionTask, WorkflowExecution, WorkflowType};
