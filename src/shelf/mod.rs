//! 书架协调器：把目录获取、封面同步与文档下载复用到同一个下载引擎上。
//!
//! 宿主循环周期性调用 [`Shelf::tick`]，这是唯一的让出点；用户意图通过
//! [`Shelf::handle`] 进入。下载槽的调度规则：
//! - 目录刷新优先，等当前传输结束后开始；刷新期间忽略打开请求；
//! - 封面同步每个空闲节拍走一步；
//! - 文档请求在封面同步的下一步抢占下载槽，文档结束后封面同步从暂停处继续。

pub mod cover_art;
pub mod cover_sync;
pub mod observer;


use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::base_system::context::Config;
use crate::base_system::library_paths::LibraryPaths;
use crate::catalogue::source::next_step;
use crate::catalogue::{
    AcquireError, Availability, CatalogItem, CatalogueParser, CatalogueSource, CatalogueStep,
    CategoryCounts, ParsedCatalogue, apply_filter,
};
use crate::download::space::FsDiskSpace;
use crate::download::transport::HttpTransport;
use crate::download::{Completed, DownloadEngine, DownloadRequest, DownloadStatus, EnginePoll};

pub use cover_art::CoverArt;
pub use cover_sync::{CoverSync, SyncAction};
pub use observer::{Intent, ShelfObserver};

pub const MSG_READING: &str = "Reading list of publications - please wait...";
pub const MSG_DOWNLOADING: &str = "Downloading - please wait...";
pub const MSG_NO_NETWORK: &str = "No network connection - bookshelf cannot be updated";
pub const MSG_NO_CATALOGUE: &str = "Unable to read the list of publications";
pub const MSG_LOCKED: &str = "This publication is only available to contributors";
pub const MSG_DOWNLOAD_FAILED: &str = "Unable to download file";
pub const MSG_NO_SPACE: &str = "Not enough free disk space to download file";

/// 下载完成时交还的任务标记。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Catalogue(CatalogueStep),
    Cover(usize),
    Document(usize),
}

pub struct Shelf {
    engine: DownloadEngine<Job>,
    source: CatalogueSource,
    parser: CatalogueParser,
    paths: LibraryPaths,
    art: CoverArt,
    observer: Box<dyn ShelfObserver>,
    items: Vec<CatalogItem>,
    counts: CategoryCounts,
    filter: String,
    covers: CoverSync,
    pending_document: Option<usize>,
    pending_refresh: bool,
    refreshing: bool,
    remote_failed: bool,
    space_exhausted: bool,
    credential: Option<String>,
    contributor_mode: bool,
}

impl Shelf {
    pub fn new(
        engine: DownloadEngine<Job>,
        source: CatalogueSource,
        parser: CatalogueParser,
        paths: LibraryPaths,
        art: CoverArt,
        observer: Box<dyn ShelfObserver>,
    ) -> Self {
        Self {
            engine,
            source,
            parser,
            paths,
            art,
            observer,
            items: Vec::new(),
            counts: CategoryCounts::default(),
            filter: String::new(),
            covers: CoverSync::default(),
            pending_document: None,
            pending_refresh: false,
            refreshing: false,
            remote_failed: false,
            space_exhausted: false,
            credential: None,
            contributor_mode: false,
        }
    }

    /// 按配置装配 HTTP 传输、磁盘空间查询与各路径。
    pub fn from_config(config: &Config, observer: Box<dyn ShelfObserver>) -> anyhow::Result<Self> {
        let paths = LibraryPaths::from_config(config);
        paths
            .ensure_dirs()
            .with_context(|| format!("创建缓存目录失败: {}", paths.cache_dir.display()))?;

        let transport = HttpTransport::new(Duration::from_secs(config.request_timeout.max(1)))?;
        let engine = DownloadEngine::new(
            Box::new(transport),
            Box::new(FsDiskSpace),
            config.free_space_margin_bytes(),
        );
        let language = config.effective_language();
        info!(target: "shelf", language = ?language, "书架初始化");

        Ok(Self::new(
            engine,
            CatalogueSource::from_config(config, paths.clone()),
            CatalogueParser::new(paths.clone(), language),
            paths.clone(),
            CoverArt::new(&paths.assets_dir, config.cover_size),
            observer,
        ))
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    pub fn counts(&self) -> &CategoryCounts {
        &self.counts
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing || self.pending_refresh
    }

    pub fn active_job(&self) -> Option<Job> {
        self.engine.active_job().copied()
    }

    pub fn covers(&self) -> &CoverSync {
        &self.covers
    }

    pub fn pending_document(&self) -> Option<usize> {
        self.pending_document
    }

    /// 处理一条用户意图；返回 `false` 表示宿主应退出。
    pub fn handle(&mut self, intent: Intent) -> bool {
        match intent {
            Intent::Refresh => self.refresh(),
            Intent::Activate(idx) => self.activate(idx),
            Intent::Delete(idx) => self.delete_local_copy(idx),
            Intent::Cancel => self.cancel(),
            Intent::Filter(text) => self.set_filter(text),
            Intent::Quit => {
                self.engine.cancel();
                return false;
            }
        }
        true
    }

    /// 协作式让出点：推进传输、分发完成结果，空闲时调度下一项工作。
    pub fn tick(&mut self) {
        match self.engine.poll() {
            EnginePoll::Complete(done) => self.on_complete(done),
            EnginePoll::InProgress(Some(progress)) => self.observer.progress(progress),
            EnginePoll::InProgress(None) => {}
            EnginePoll::Idle => self.on_idle(),
        }
    }

    fn on_idle(&mut self) {
        if self.pending_refresh {
            self.begin_refresh();
            return;
        }
        if self.refreshing {
            return;
        }
        if self.covers.is_active() {
            self.cover_step();
            return;
        }
        if let Some(idx) = self.pending_document.take() {
            self.start_document(idx);
        }
    }

    fn on_complete(&mut self, done: Completed<Job>) {
        match done.job {
            Job::Catalogue(step) => self.on_catalogue_complete(step, done.status),
            Job::Cover(idx) => self.on_cover_complete(idx, done.status, &done.destination),
            Job::Document(idx) => self.on_document_complete(idx, done.status, &done.destination),
        }
    }

    // ── 目录刷新 ────────────────────────────────────────────────

    pub fn refresh(&mut self) {
        if self.is_refreshing() {
            debug!(target: "shelf", "目录刷新已在进行");
            return;
        }
        self.covers.stop();
        if self.pending_document.take().is_some() {
            self.observer.dismiss_message();
        }
        match self.active_job() {
            None => self.begin_refresh(),
            Some(job) => {
                // 封面传输直接取消；文档传输允许完成
                if matches!(job, Job::Cover(_)) {
                    self.engine.cancel();
                }
                debug!(target: "shelf", ?job, "等待当前传输结束后刷新目录");
                self.pending_refresh = true;
            }
        }
    }

    fn begin_refresh(&mut self) {
        self.pending_refresh = false;
        self.refreshing = true;
        self.remote_failed = false;
        self.space_exhausted = false;
        self.covers.stop();
        self.credential = self.paths.read_credential();
        self.observer.message(MSG_READING, false);

        let step = self.source.first_step(self.credential.as_deref());
        info!(target: "shelf", step = step.label(), "开始刷新目录");
        self.run_step(step);
    }

    /// 从 `step` 开始沿回退链前进，直到发起远端下载或得到结果。
    fn run_step(&mut self, mut step: CatalogueStep) {
        loop {
            let outcome = if step.is_remote() {
                let request = self.source.remote_request(step, self.credential.as_deref());
                match request.map(|req| self.engine.start(req, Job::Catalogue(step))) {
                    Some(Ok(())) => return,
                    Some(Err(err)) => {
                        warn!(target: "shelf", "无法发起目录下载: {err}");
                        Err(AcquireError::TransportFailure)
                    }
                    None => Err(AcquireError::TransportFailure),
                }
            } else {
                self.source.load_local(step, &self.parser)
            };

            match outcome {
                Ok(parsed) => {
                    self.install(parsed, step);
                    return;
                }
                Err(err) => match next_step(step, err) {
                    Some(next) => {
                        info!(target: "shelf", from = step.label(), to = next.label(), "目录回退: {err}");
                        step = next;
                    }
                    None => {
                        self.catalogue_unavailable();
                        return;
                    }
                },
            }
        }
    }

    fn on_catalogue_complete(&mut self, step: CatalogueStep, status: DownloadStatus) {
        let outcome = match AcquireError::from_status(status) {
            None => self.source.accept_remote(&self.parser),
            Some(err) => Err(err),
        };
        match outcome {
            Ok(parsed) => self.install(parsed, step),
            Err(err) => {
                warn!(target: "shelf", step = step.label(), "目录获取失败: {err}");
                match err {
                    AcquireError::InsufficientSpace => self.space_exhausted = true,
                    // 用户主动取消不算断网
                    AcquireError::Cancelled => {}
                    _ => self.remote_failed = true,
                }
                match next_step(step, err) {
                    Some(next) => self.run_step(next),
                    None => self.catalogue_unavailable(),
                }
            }
        }
    }

    fn install(&mut self, parsed: ParsedCatalogue, step: CatalogueStep) {
        self.refreshing = false;
        self.contributor_mode = step == CatalogueStep::Contributor;
        self.items = parsed.items;
        self.counts = parsed.counts;
        for idx in 0..self.items.len() {
            self.unlock_for_contributor(idx);
            let item = &mut self.items[idx];
            item.cover = Some(self.art.compose(None, item.availability, false));
        }
        info!(
            target: "shelf",
            step = step.label(),
            items = self.items.len(),
            hidden = ?self.counts.empty_categories(),
            "目录已载入"
        );

        self.observer.dismiss_message();
        self.observer.items_changed(&self.items, &self.counts);
        if !step.is_remote() {
            if self.space_exhausted {
                self.observer.message(MSG_NO_SPACE, true);
            } else if self.remote_failed {
                self.observer.message(MSG_NO_NETWORK, true);
            }
        }
        if !self.filter.is_empty() {
            self.emit_filter();
        }
        self.covers.begin();
    }

    fn catalogue_unavailable(&mut self) {
        self.refreshing = false;
        warn!(target: "shelf", "所有目录来源均不可用");
        self.observer.dismiss_message();
        self.observer.message(MSG_NO_CATALOGUE, true);
    }

    /// 贡献者模式下受限条目可以下载。
    fn unlock_for_contributor(&mut self, idx: usize) {
        if let Some(item) = self.items.get_mut(idx)
            && self.contributor_mode
            && item.availability == Availability::Locked
        {
            item.availability = Availability::Available;
        }
    }

    // ── 封面同步 ────────────────────────────────────────────────

    fn cover_step(&mut self) {
        let action = self.covers.next_action(
            &self.items,
            &self.paths,
            self.pending_document.is_some(),
        );
        match action {
            None => {}
            Some(SyncAction::YieldToDocument) => {
                if let Some(idx) = self.pending_document.take() {
                    debug!(target: "shelf", idx, cursor = self.covers.cursor(), "封面同步让出给文档下载");
                    self.start_document(idx);
                }
            }
            Some(SyncAction::Compose(idx, path)) => self.compose(idx, Some(&path), false),
            Some(SyncAction::Fetch(idx, path)) => {
                let url = self.items[idx].cover_ref.clone();
                if let Err(err) = self.engine.start(DownloadRequest::new(url, path), Job::Cover(idx)) {
                    warn!(target: "shelf", idx, "无法发起封面下载: {err}");
                    self.covers.fetch_finished(idx);
                }
            }
            Some(SyncAction::Skip(idx)) => {
                debug!(target: "shelf", idx, "封面引用无效，保留占位图");
            }
            Some(SyncAction::Finished) => {
                info!(target: "shelf", "封面同步完成");
            }
        }
    }

    fn on_cover_complete(&mut self, idx: usize, status: DownloadStatus, destination: &Path) {
        let current = self.covers.in_flight() == Some(idx);
        self.covers.fetch_finished(idx);
        if !current || self.pending_refresh {
            debug!(target: "shelf", idx, ?status, "忽略已中止的封面下载");
            return;
        }
        if status.is_success() {
            self.compose(idx, Some(destination), true);
        } else if status == DownloadStatus::NoSpace {
            // 磁盘已满，后续封面同样会失败，本轮同步到此为止
            warn!(target: "shelf", idx, "磁盘空间不足，停止封面同步");
            self.covers.stop();
            self.observer.message(MSG_NO_SPACE, true);
        } else {
            debug!(target: "shelf", idx, ?status, "封面下载失败，保留占位图");
        }
    }

    fn compose(&mut self, idx: usize, cover: Option<&Path>, fresh: bool) {
        let Some(item) = self.items.get_mut(idx) else {
            return;
        };
        let image = self.art.compose(cover, item.availability, fresh);
        self.observer.cover_updated(idx, &image);
        item.cover = Some(image);
    }

    /// 可用性变化后按本地封面重新合成。
    fn recompose(&mut self, idx: usize) {
        let cover = self
            .items
            .get(idx)
            .and_then(|item| self.paths.cover_path(&item.cover_ref))
            .filter(|p| p.is_file());
        self.compose(idx, cover.as_deref(), false);
    }

    // ── 文档 ────────────────────────────────────────────────────

    pub fn activate(&mut self, idx: usize) {
        if self.is_refreshing() {
            debug!(target: "shelf", idx, "目录刷新中，忽略打开请求");
            return;
        }
        let Some(item) = self.items.get(idx) else {
            warn!(target: "shelf", idx, "条目不存在");
            return;
        };
        if item.availability == Availability::Locked {
            self.observer.message(MSG_LOCKED, true);
            return;
        }
        if let Some(path) = item.local_ref().and_then(|r| self.paths.resolve_document(r)) {
            if item.availability != Availability::Downloaded {
                self.items[idx].availability = Availability::Downloaded;
                self.recompose(idx);
            }
            self.observer.document_ready(&path);
            return;
        }
        if self.document_outstanding() {
            warn!(target: "shelf", idx, "已有文档下载在进行，忽略本次请求");
            return;
        }

        self.observer.message(MSG_DOWNLOADING, false);
        if self.covers.is_active() || self.engine.is_busy() {
            self.pending_document = Some(idx);
        } else {
            self.start_document(idx);
        }
    }

    fn document_outstanding(&self) -> bool {
        self.pending_document.is_some()
            || matches!(self.engine.active_job(), Some(Job::Document(_)))
    }

    fn document_target(&self, idx: usize) -> Option<(String, PathBuf)> {
        let reference = self.items.get(idx)?.local_ref()?;
        let destination = self.paths.user_document_path(reference)?;
        Some((reference.to_string(), destination))
    }

    fn start_document(&mut self, idx: usize) {
        let Some((url, destination)) = self.document_target(idx) else {
            warn!(target: "shelf", idx, "文档引用无效");
            self.observer.dismiss_message();
            self.observer.message(MSG_DOWNLOAD_FAILED, true);
            return;
        };
        let token = if self.contributor_mode {
            self.credential.clone()
        } else {
            None
        };
        let request = DownloadRequest::new(url, destination)
            .with_progress()
            .with_auth(token);
        match self.engine.start(request, Job::Document(idx)) {
            Ok(()) => info!(target: "shelf", idx, "开始下载文档"),
            Err(err) => {
                debug!(target: "shelf", idx, "下载槽被占用，稍后重试: {err}");
                self.pending_document = Some(idx);
            }
        }
    }

    fn on_document_complete(&mut self, idx: usize, status: DownloadStatus, destination: &Path) {
        self.observer.dismiss_message();
        match status {
            DownloadStatus::Success => {
                if let Some(item) = self.items.get_mut(idx) {
                    item.availability = Availability::Downloaded;
                }
                self.recompose(idx);
                self.observer.document_ready(destination);
            }
            DownloadStatus::NoSpace => self.observer.message(MSG_NO_SPACE, true),
            DownloadStatus::Failure => self.observer.message(MSG_DOWNLOAD_FAILED, true),
            DownloadStatus::Cancelled => info!(target: "shelf", idx, "文档下载已取消"),
        }
    }

    pub fn delete_local_copy(&mut self, idx: usize) {
        if self.engine.active_job() == Some(&Job::Document(idx))
            || self.pending_document == Some(idx)
        {
            warn!(target: "shelf", idx, "文档正在下载，不能删除");
            return;
        }
        let Some(path) = self
            .items
            .get(idx)
            .and_then(|item| item.local_ref())
            .and_then(|r| self.paths.user_document_path(r))
        else {
            return;
        };
        if path.is_file() {
            match fs::remove_file(&path) {
                Ok(()) => info!(target: "shelf", idx, "已删除 {}", path.display()),
                Err(err) => warn!(target: "shelf", "删除 {} 失败: {err}", path.display()),
            }
        }

        let before = self.items[idx].availability;
        self.items[idx].reclassify(&self.paths);
        self.unlock_for_contributor(idx);
        if self.items[idx].availability != before {
            self.recompose(idx);
        }
    }

    /// 取消进行中或等待中的文档下载；目录下载取消后沿回退链继续。
    pub fn cancel(&mut self) {
        if self.pending_document.take().is_some() {
            self.observer.dismiss_message();
            return;
        }
        match self.engine.active_job() {
            Some(Job::Document(_)) | Some(Job::Catalogue(_)) => self.engine.cancel(),
            _ => debug!(target: "shelf", "没有可取消的下载"),
        }
    }

    // ── 过滤 ────────────────────────────────────────────────────

    pub fn set_filter(&mut self, text: String) {
        self.filter = text;
        self.emit_filter();
    }

    fn emit_filter(&mut self) {
        let view = apply_filter(&self.items, &self.filter);
        self.observer.filter_changed(&view.visible, &view.counts);
    }
}
