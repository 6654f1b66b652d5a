//! Impls - 実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **ScriptedRemote**: replays a fixed sequence of replies, records every call

pub mod scripted_remote;

pub use self::scripted_remote::{Reply, ScriptedRemote};
