//! 目标文件系统剩余空间查询。

use std::io;
use std::path::{Path, PathBuf};

pub trait DiskSpace {
    fn available(&self, path: &Path) -> io::Result<u64>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsDiskSpace;

impl DiskSpace for FsDiskSpace {
    fn available(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(nearest_existing(path))
    }
}

/// 目标文件可能尚未创建，向上找到第一个存在的祖先目录。
fn nearest_existing(path: &Path) -> PathBuf {
    let mut candidate = path.to_path_buf();
    while !candidate.exists() {
        if !candidate.pop() {
            return PathBuf::from(".");
        }
    }
    candidate
}
