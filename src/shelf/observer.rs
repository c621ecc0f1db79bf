//! 书架与外部界面之间的接口：状态通知与用户意图。

use std::path::Path;

use crate::catalogue::models::{CatalogItem, CategoryCounts, CoverImage};
use crate::download::Progress;

/// 界面侧实现，接收书架状态变化。所有回调都在协调线程上调用。
pub trait ShelfObserver {
    fn items_changed(&mut self, items: &[CatalogItem], counts: &CategoryCounts);
    fn cover_updated(&mut self, index: usize, image: &CoverImage);
    fn progress(&mut self, progress: Progress);
    /// `blocking` 为真时需要用户确认；否则是可被 `dismiss_message` 关闭的提示。
    fn message(&mut self, text: &str, blocking: bool);
    fn dismiss_message(&mut self);
    fn document_ready(&mut self, path: &Path);
    fn filter_changed(&mut self, visible: &[usize], counts: &CategoryCounts);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Refresh,
    Activate(usize),
    Delete(usize),
    Cancel,
    Filter(String),
    Quit,
}
