//! Typed - payload 型付きの decider building block
//!
//! callback の形（引数・payload 型・戻り値）を型で固定し、
//! 食い違いを実行時ではなくコンパイル時に弾きます。
//!
//! - **表層（Typed）**: `Typed<D>` - 具体的な payload 型で callback を受け取る
//! - **内部（Decider）**: `Decider<D>` - Arc に包んだ type-erased な closure

pub mod adapter;

pub use self::adapter::Typed;
