//! 封面同步游标：每个空闲节拍走一步，逐个补齐缺失的封面。

use std::path::PathBuf;

use crate::base_system::library_paths::LibraryPaths;
use crate::catalogue::models::CatalogItem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// 有文档请求等待，让出下载槽；游标不动。
    YieldToDocument,
    /// 本地已有封面，直接合成。
    Compose(usize, PathBuf),
    /// 封面缺失，需要下载到给定路径。
    Fetch(usize, PathBuf),
    /// 封面引用无法映射到本地文件名，保留占位图。
    Skip(usize),
    Finished,
}

#[derive(Debug, Default)]
pub struct CoverSync {
    cursor: usize,
    active: bool,
    in_flight: Option<usize>,
}

impl CoverSync {
    pub fn begin(&mut self) {
        self.cursor = 0;
        self.active = true;
        self.in_flight = None;
    }

    pub fn stop(&mut self) {
        self.active = false;
        self.in_flight = None;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn in_flight(&self) -> Option<usize> {
        self.in_flight
    }

    /// 决定下一步动作；未激活或有封面正在下载时返回 `None`。
    pub fn next_action(
        &mut self,
        items: &[CatalogItem],
        paths: &LibraryPaths,
        document_pending: bool,
    ) -> Option<SyncAction> {
        if !self.active || self.in_flight.is_some() {
            return None;
        }
        if document_pending {
            return Some(SyncAction::YieldToDocument);
        }
        let Some(item) = items.get(self.cursor) else {
            self.active = false;
            return Some(SyncAction::Finished);
        };

        let idx = self.cursor;
        match paths.cover_path(&item.cover_ref) {
            Some(path) if path.is_file() => {
                self.cursor += 1;
                Some(SyncAction::Compose(idx, path))
            }
            Some(path) => {
                self.in_flight = Some(idx);
                Some(SyncAction::Fetch(idx, path))
            }
            None => {
                self.cursor += 1;
                Some(SyncAction::Skip(idx))
            }
        }
    }

    /// 封面下载结束（无论成败），游标前进到下一条。
    pub fn fetch_finished(&mut self, idx: usize) {
        if self.in_flight == Some(idx) {
            self.in_flight = None;
            self.cursor = idx + 1;
        }
    }
}
