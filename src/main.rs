//! Bookshelf：出版物目录浏览与离线缓存。
//!
//! 本 crate 负责：拉取远端目录（带回退链）、解析条目、按需下载封面与文档并缓存到本地。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/本地路径等基础设施
//! - `download`：单任务下载引擎（HTTP 传输、磁盘空间检查、暂存文件）
//! - `catalogue`：目录模型、解析、获取回退链与过滤
//! - `shelf`：协调器，把目录刷新、封面同步和文档下载复用到同一个下载槽
//! - `ui`：控制台交互

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::info;

mod base_system;
mod catalogue;
mod download;
mod shelf;
mod ui;

use base_system::config::load_config;
use base_system::logging::{LogOptions, LogSystem};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "bookshelf")]
#[command(about = "Browse and cache downloadable publications")]
struct Cli {
    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 显示版本信息后退出
    #[arg(long, default_value_t = false)]
    version: bool,

    /// 数据目录路径（存放 config.yml、logs 与缓存）
    #[arg(long)]
    data_dir: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("Bookshelf v{}", VERSION);
        return Ok(());
    }

    let data_dir = cli
        .data_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let log = init_logging(cli.debug, &data_dir)?;

    let config = load_config(&data_dir).map_err(|e| anyhow!(e.to_string()))?;
    info!(target: "startup", "当前版本: v{}", VERSION);

    let result = ui::noui::run(&config);
    // 正常退出时先归档日志
    log.safe_exit();
    result
}

fn init_logging(debug: bool, base_dir: &Path) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        ..LogOptions::default()
    };
    LogSystem::init_with_base(opts, Some(base_dir)).map_err(|e| anyhow!(e))
}
