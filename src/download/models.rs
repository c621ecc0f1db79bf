//! 下载相关的数据模型定义。
//!
//! 包含下载请求、最终状态、进度值与完成通知。

use std::path::PathBuf;

/// 单次传输的最终状态。任务在确认成功前一律视为 `Failure`。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DownloadStatus {
    #[default]
    Failure,
    Success,
    Cancelled,
    NoSpace,
}

impl DownloadStatus {
    pub fn is_success(self) -> bool {
        self == DownloadStatus::Success
    }
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub destination: PathBuf,
    pub wants_progress: bool,
    pub auth_token: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            wants_progress: false,
            auth_token: None,
        }
    }

    pub fn with_progress(mut self) -> Self {
        self.wants_progress = true;
        self
    }

    pub fn with_auth(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }
}

/// 供进度条显示：已知总长时为 0..=1 的比例，否则为不确定进度。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    Fraction(f64),
    Indeterminate,
}

/// 一次传输结束后交还给调用方的结果，`job` 为发起方携带的续体标记。
#[derive(Debug, Clone, PartialEq)]
pub struct Completed<J> {
    pub job: J,
    pub status: DownloadStatus,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePoll<J> {
    Idle,
    InProgress(Option<Progress>),
    Complete(Completed<J>),
}
