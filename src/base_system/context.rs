//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::config::{ConfigSpec, FieldMeta};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 目录源配置
    #[serde(default = "default_catalogue_url")]
    pub catalogue_url: String,
    #[serde(default = "default_contributor_catalogue_url")]
    pub contributor_catalogue_url: String,
    #[serde(default)]
    pub language: String,

    // 路径配置
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "default_documents_dir")]
    pub documents_dir: String,
    #[serde(default = "default_bundled_documents_dir")]
    pub bundled_documents_dir: String,
    #[serde(default)]
    pub bundled_catalogue: String,
    #[serde(default = "default_credential_file")]
    pub credential_file: String,
    #[serde(default = "default_assets_dir")]
    pub assets_dir: String,

    // 下载配置
    #[serde(default = "default_free_space_margin_mb")]
    pub free_space_margin_mb: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    // 显示配置
    #[serde(default = "default_cover_size")]
    pub cover_size: u32,

    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalogue_url: default_catalogue_url(),
            contributor_catalogue_url: default_contributor_catalogue_url(),
            language: String::new(),
            cache_dir: default_cache_dir(),
            documents_dir: default_documents_dir(),
            bundled_documents_dir: default_bundled_documents_dir(),
            bundled_catalogue: String::new(),
            credential_file: default_credential_file(),
            assets_dir: default_assets_dir(),
            free_space_margin_mb: default_free_space_margin_mb(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout: default_request_timeout(),
            cover_size: default_cover_size(),
            base_dir: None,
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 13] = [
            FieldMeta {
                name: "catalogue_url",
                description: "公开目录地址",
            },
            FieldMeta {
                name: "contributor_catalogue_url",
                description: "贡献者目录地址（存在凭据文件时优先使用）",
            },
            FieldMeta {
                name: "language",
                description: "目录本地化语言（两位代码，如 de；留空则读取 LANG 环境变量）",
            },
            FieldMeta {
                name: "cache_dir",
                description: "目录与封面缓存目录",
            },
            FieldMeta {
                name: "documents_dir",
                description: "下载文档保存目录",
            },
            FieldMeta {
                name: "bundled_documents_dir",
                description: "系统预装文档目录（只读，优先于下载目录）",
            },
            FieldMeta {
                name: "bundled_catalogue",
                description: "内置默认目录文件（留空则使用程序自带目录）",
            },
            FieldMeta {
                name: "credential_file",
                description: "贡献者访问凭据文件",
            },
            FieldMeta {
                name: "assets_dir",
                description: "封面角标图片目录（cloud/padlock/new/nocover.png）",
            },
            FieldMeta {
                name: "free_space_margin_mb",
                description: "下载时保留的磁盘剩余空间（MB）",
            },
            FieldMeta {
                name: "poll_interval_ms",
                description: "下载轮询间隔（毫秒）",
            },
            FieldMeta {
                name: "request_timeout",
                description: "建立连接超时时间（秒）",
            },
            FieldMeta {
                name: "cover_size",
                description: "封面缩略图最长边像素",
            },
        ];
        &FIELDS
    }
}

impl Config {
    /// 记录配置文件所在的数据目录，相对路径以它为基准。
    pub fn set_base_dir(&mut self, dir: &Path) {
        self.base_dir = Some(dir.to_path_buf());
    }

    pub fn base_dir(&self) -> PathBuf {
        self.base_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn resolve(&self, raw: &str) -> PathBuf {
        let p = PathBuf::from(raw.trim());
        if p.is_absolute() {
            p
        } else {
            self.base_dir().join(p)
        }
    }

    pub fn bundled_catalogue_path(&self) -> Option<PathBuf> {
        if self.bundled_catalogue.trim().is_empty() {
            None
        } else {
            Some(self.resolve(&self.bundled_catalogue))
        }
    }

    pub fn free_space_margin_bytes(&self) -> u64 {
        self.free_space_margin_mb.saturating_mul(1024 * 1024)
    }

    /// 目录本地化所用的两位语言代码。
    pub fn effective_language(&self) -> Option<String> {
        let configured = self.language.trim();
        if !configured.is_empty() {
            return language_code(configured);
        }
        ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .find(|v| !v.trim().is_empty())
            .and_then(|v| language_code(&v))
    }
}

/// `de_DE.UTF-8` -> `de`；`C`/`POSIX` 视为无本地化。
pub fn language_code(raw: &str) -> Option<String> {
    let head = raw
        .trim()
        .split(['_', '.', '@', '-'])
        .next()
        .unwrap_or_default();
    if head.eq_ignore_ascii_case("c") || head.eq_ignore_ascii_case("posix") {
        return None;
    }
    if head.len() == 2 && head.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(head.to_ascii_lowercase())
    } else {
        None
    }
}

fn default_catalogue_url() -> String {
    "https://magazines-static.raspberrypi.org/bookshelf/cat.xml".to_string()
}

fn default_contributor_catalogue_url() -> String {
    "https://magazines-static.raspberrypi.org/bookshelf/contributor/cat.xml".to_string()
}

fn default_cache_dir() -> String {
    "cache".to_string()
}

fn default_documents_dir() -> String {
    "MagPi".to_string()
}

fn default_bundled_documents_dir() -> String {
    "/usr/share/magpi".to_string()
}

fn default_credential_file() -> String {
    "cache/contributor.key".to_string()
}

fn default_assets_dir() -> String {
    "assets".to_string()
}

fn default_free_space_margin_mb() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_request_timeout() -> u64 {
    15
}

fn default_cover_size() -> u32 {
    128
}
