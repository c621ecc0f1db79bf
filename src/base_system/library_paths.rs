//! 本地缓存路径：目录文件、封面、文档与凭据。
//!
//! 文档本地副本的查找顺序（先命中者优先）：
//! 1. 系统预装目录 `bundled_documents_dir`
//! 2. 用户下载目录 `documents_dir`

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::base_system::context::Config;

pub const CATALOGUE_FILE: &str = "cat.xml";
pub const BACKUP_FILE: &str = "cat.bak";
const COVERS_DIR: &str = "covers";

#[derive(Debug, Clone)]
pub struct LibraryPaths {
    pub cache_dir: PathBuf,
    pub covers_dir: PathBuf,
    pub documents_dir: PathBuf,
    pub bundled_documents_dir: PathBuf,
    pub credential_file: PathBuf,
    pub assets_dir: PathBuf,
}

impl LibraryPaths {
    pub fn from_config(config: &Config) -> Self {
        let cache_dir = config.resolve(&config.cache_dir);
        Self {
            covers_dir: cache_dir.join(COVERS_DIR),
            cache_dir,
            documents_dir: config.resolve(&config.documents_dir),
            bundled_documents_dir: config.resolve(&config.bundled_documents_dir),
            credential_file: config.resolve(&config.credential_file),
            assets_dir: config.resolve(&config.assets_dir),
        }
    }

    /// 以单一根目录布局所有路径（测试与便携模式使用）。
    pub fn under(root: &Path) -> Self {
        let cache_dir = root.join("cache");
        Self {
            covers_dir: cache_dir.join(COVERS_DIR),
            cache_dir,
            documents_dir: root.join("documents"),
            bundled_documents_dir: root.join("bundled"),
            credential_file: root.join("contributor.key"),
            assets_dir: root.join("assets"),
        }
    }

    pub fn ensure_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(&self.cache_dir)?;
        fs::create_dir_all(&self.covers_dir)?;
        fs::create_dir_all(&self.documents_dir)?;
        Ok(())
    }

    pub fn catalogue_file(&self) -> PathBuf {
        self.cache_dir.join(CATALOGUE_FILE)
    }

    pub fn backup_file(&self) -> PathBuf {
        self.cache_dir.join(BACKUP_FILE)
    }

    pub fn cover_path(&self, cover_ref: &str) -> Option<PathBuf> {
        ref_basename(cover_ref).map(|name| self.covers_dir.join(name))
    }

    pub fn user_document_path(&self, doc_ref: &str) -> Option<PathBuf> {
        ref_basename(doc_ref).map(|name| self.documents_dir.join(name))
    }

    /// 按优先级列出文档的候选本地路径。
    pub fn document_candidates(&self, doc_ref: &str) -> Vec<PathBuf> {
        let Some(name) = ref_basename(doc_ref) else {
            return Vec::new();
        };
        vec![
            self.bundled_documents_dir.join(&name),
            self.documents_dir.join(&name),
        ]
    }

    pub fn resolve_document(&self, doc_ref: &str) -> Option<PathBuf> {
        first_existing(&self.document_candidates(doc_ref))
    }

    /// 读取贡献者凭据：首个非空行。
    pub fn read_credential(&self) -> Option<String> {
        let raw = fs::read_to_string(&self.credential_file).ok()?;
        raw.lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
    }
}

pub fn first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.is_file()).cloned()
}

/// 远端引用（URL 或路径）的文件名部分，忽略查询串与片段。
pub fn ref_basename(reference: &str) -> Option<String> {
    let trimmed = reference.trim();
    let without_query = trimmed
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    let name = without_query.rsplit(['/', '\\']).next().unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." || name.contains(':') {
        return None;
    }
    Some(name.to_string())
}

/// 下载暂存文件：在目标文件名后追加 `.tmp`。
pub fn staging_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    destination.with_file_name(name)
}
