//! 交互层入口。
//!
//! 书架核心只通过 `ShelfObserver` / `Intent` 与界面交互；这里提供控制台实现。

pub mod noui;
