//! 下载引擎模块入口。
//!
//! 子模块：
//! - `models`    — 下载请求 / 状态 / 进度 / 完成通知
//! - `engine`    — 单任务下载状态机（请求 → 轮询 → 完成）
//! - `transport` — HTTP 传输抽象与 reqwest 实现
//! - `space`     — 剩余磁盘空间查询

pub mod engine;
pub mod models;
pub mod space;
pub mod transport;

pub use engine::DownloadEngine;
pub use models::{Completed, DownloadRequest, DownloadStatus, EnginePoll, Progress};
