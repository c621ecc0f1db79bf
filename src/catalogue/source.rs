//! 目录获取的回退链：贡献者端点 → 公开端点 → 上次成功的备份 → 内置默认目录。
//!
//! 远端步骤通过下载引擎异步完成，由调用方在完成后调用 [`CatalogueSource::accept_remote`]；
//! 本地步骤用 [`CatalogueSource::load_local`] 同步读取。

use std::fs;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::models::ParsedCatalogue;
use super::parser::CatalogueParser;
use crate::base_system::context::Config;
use crate::base_system::library_paths::LibraryPaths;
use crate::download::{DownloadRequest, DownloadStatus};

/// 编译进二进制的默认目录，保证回退链总有数据。
pub const BUNDLED_CATALOGUE: &str = include_str!("../../assets/catalogue.xml");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogueStep {
    Contributor,
    Public,
    Backup,
    Bundled,
}

impl CatalogueStep {
    pub fn is_remote(self) -> bool {
        matches!(self, CatalogueStep::Contributor | CatalogueStep::Public)
    }

    pub fn label(self) -> &'static str {
        match self {
            CatalogueStep::Contributor => "contributor",
            CatalogueStep::Public => "public",
            CatalogueStep::Backup => "backup",
            CatalogueStep::Bundled => "bundled",
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    #[error("catalogue transfer failed")]
    TransportFailure,
    #[error("not enough free space to store the catalogue")]
    InsufficientSpace,
    #[error("catalogue transfer was cancelled")]
    Cancelled,
    #[error("catalogue contained no usable items")]
    ParseYieldedNothing,
}

impl AcquireError {
    /// 下载结束状态对应的获取错误；成功时为 `None`。
    pub fn from_status(status: DownloadStatus) -> Option<Self> {
        match status {
            DownloadStatus::Success => None,
            DownloadStatus::Failure => Some(AcquireError::TransportFailure),
            DownloadStatus::NoSpace => Some(AcquireError::InsufficientSpace),
            DownloadStatus::Cancelled => Some(AcquireError::Cancelled),
        }
    }
}

/// 某一步失败后的下一步；`None` 表示回退链已耗尽。
pub fn next_step(failed: CatalogueStep, err: AcquireError) -> Option<CatalogueStep> {
    match (failed, err) {
        // 磁盘空间不足时不再尝试其它远端
        (CatalogueStep::Contributor, AcquireError::InsufficientSpace) => {
            Some(CatalogueStep::Backup)
        }
        (CatalogueStep::Contributor, _) => Some(CatalogueStep::Public),
        (CatalogueStep::Public, _) => Some(CatalogueStep::Backup),
        (CatalogueStep::Backup, _) => Some(CatalogueStep::Bundled),
        (CatalogueStep::Bundled, _) => None,
    }
}

#[derive(Debug, Clone)]
pub struct CatalogueSource {
    public_url: String,
    contributor_url: String,
    paths: LibraryPaths,
    bundled_override: Option<PathBuf>,
}

impl CatalogueSource {
    pub fn new(
        public_url: impl Into<String>,
        contributor_url: impl Into<String>,
        paths: LibraryPaths,
        bundled_override: Option<PathBuf>,
    ) -> Self {
        Self {
            public_url: public_url.into(),
            contributor_url: contributor_url.into(),
            paths,
            bundled_override,
        }
    }

    pub fn from_config(config: &Config, paths: LibraryPaths) -> Self {
        Self::new(
            config.catalogue_url.clone(),
            config.contributor_catalogue_url.clone(),
            paths,
            config.bundled_catalogue_path(),
        )
    }

    pub fn first_step(&self, credential: Option<&str>) -> CatalogueStep {
        if credential.is_some_and(|c| !c.is_empty()) && !self.contributor_url.is_empty() {
            CatalogueStep::Contributor
        } else {
            CatalogueStep::Public
        }
    }

    /// 远端步骤的下载请求；本地步骤返回 `None`。
    pub fn remote_request(
        &self,
        step: CatalogueStep,
        credential: Option<&str>,
    ) -> Option<DownloadRequest> {
        let destination = self.paths.catalogue_file();
        match step {
            CatalogueStep::Contributor => Some(
                DownloadRequest::new(self.contributor_url.as_str(), destination)
                    .with_auth(credential.map(str::to_string)),
            ),
            CatalogueStep::Public => {
                Some(DownloadRequest::new(self.public_url.as_str(), destination))
            }
            CatalogueStep::Backup | CatalogueStep::Bundled => None,
        }
    }

    /// 远端下载成功后解析目录文件；有条目时覆盖备份。
    pub fn accept_remote(
        &self,
        parser: &CatalogueParser,
    ) -> Result<ParsedCatalogue, AcquireError> {
        let path = self.paths.catalogue_file();
        let text = fs::read_to_string(&path).map_err(|err| {
            warn!(target: "catalogue", "读取目录文件失败 {}: {err}", path.display());
            AcquireError::TransportFailure
        })?;
        let parsed = parser.parse(&text);
        if parsed.is_empty() {
            return Err(AcquireError::ParseYieldedNothing);
        }

        let backup = self.paths.backup_file();
        match fs::copy(&path, &backup) {
            Ok(_) => debug!(target: "catalogue", "目录已备份到 {}", backup.display()),
            Err(err) => warn!(target: "catalogue", "备份目录失败 {}: {err}", backup.display()),
        }
        Ok(parsed)
    }

    pub fn load_local(
        &self,
        step: CatalogueStep,
        parser: &CatalogueParser,
    ) -> Result<ParsedCatalogue, AcquireError> {
        let parsed = match step {
            CatalogueStep::Backup => {
                let path = self.paths.backup_file();
                match fs::read_to_string(&path) {
                    Ok(text) => parser.parse(&text),
                    Err(err) => {
                        info!(target: "catalogue", "没有可用的目录备份 {}: {err}", path.display());
                        ParsedCatalogue::default()
                    }
                }
            }
            CatalogueStep::Bundled => parser.parse(&self.bundled_text()),
            CatalogueStep::Contributor | CatalogueStep::Public => {
                return Err(AcquireError::TransportFailure);
            }
        };

        if parsed.is_empty() {
            Err(AcquireError::ParseYieldedNothing)
        } else {
            Ok(parsed)
        }
    }

    fn bundled_text(&self) -> String {
        if let Some(path) = &self.bundled_override {
            match fs::read_to_string(path) {
                Ok(text) => return text,
                Err(err) => warn!(
                    target: "catalogue",
                    "读取默认目录 {} 失败，改用内置目录: {err}",
                    path.display()
                ),
            }
        }
        BUNDLED_CATALOGUE.to_string()
    }
}
