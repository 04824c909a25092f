//! heddle-core
//!
//! Worker-side engine for event-sourced workflow deciders.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, event, task, decision, outcome, state, config, errors）
//! - **decider**: Decider の合成、OnX フィルタ、leaf builder、managed continuations
//! - **typed**: 型付き adapter（データ型の不一致をコンパイル時に検出）
//! - **ports**: 抽象化レイヤー（OrchestrationClient, DecisionTaskDispatcher, SnapshotStore, など）
//! - **app**: FSM、DecisionWorker、Migrator
//! - **impls**: dispatcher と in-memory 実装

pub mod domain;
pub mod decider;
pub mod typed;
pub mod ports;
pub mod app;
pub mod impls;
