//! 单任务下载引擎。
//!
//! 状态机：`start`（打开暂存文件并发起 GET）→ 反复 `poll`（协作式让出点）→ 完成。
//! 同一时刻只允许一个任务；完成结果在资源释放、暂存文件改名或删除之后才交还调用方，
//! 且每个任务只交还一次。

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::models::{Completed, DownloadRequest, DownloadStatus, EnginePoll, Progress};
use super::space::DiskSpace;
use super::transport::{Chunk, TransferStream, Transport};
use crate::base_system::library_paths::staging_path;

/// 每次轮询最多处理的数据块数，避免单次让出点占用过久。
const CHUNKS_PER_POLL: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("a transfer is already in progress")]
    Busy,
}

struct ActiveTask<J> {
    job: J,
    url: String,
    destination: PathBuf,
    staging: PathBuf,
    wants_progress: bool,
    file: Option<BufWriter<File>>,
    stream: Option<Box<dyn TransferStream>>,
    received: u64,
    status: DownloadStatus,
    done: bool,
}

impl<J> ActiveTask<J> {
    fn progress(&self) -> Option<Progress> {
        if !self.wants_progress {
            return None;
        }
        match self.stream.as_ref().and_then(|s| s.content_length()) {
            Some(total) if total > 0 => Some(Progress::Fraction(
                (self.received as f64 / total as f64).clamp(0.0, 1.0),
            )),
            _ => Some(Progress::Indeterminate),
        }
    }
}

pub struct DownloadEngine<J> {
    transport: Box<dyn Transport>,
    disk: Box<dyn DiskSpace>,
    margin: u64,
    cancel: Arc<AtomicBool>,
    active: Option<ActiveTask<J>>,
}

impl<J> DownloadEngine<J> {
    pub fn new(transport: Box<dyn Transport>, disk: Box<dyn DiskSpace>, margin: u64) -> Self {
        Self {
            transport,
            disk,
            margin,
            cancel: Arc::new(AtomicBool::new(false)),
            active: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_job(&self) -> Option<&J> {
        self.active.as_ref().map(|t| &t.job)
    }

    /// 请求取消当前任务；在下一次 `poll` 时生效。
    pub fn cancel(&self) {
        if self.active.is_some() {
            self.cancel.store(true, Ordering::SeqCst);
        }
    }

    pub fn start(&mut self, request: DownloadRequest, job: J) -> Result<(), EngineError> {
        if self.active.is_some() {
            return Err(EngineError::Busy);
        }
        self.cancel.store(false, Ordering::SeqCst);

        let DownloadRequest {
            url,
            destination,
            wants_progress,
            auth_token,
        } = request;
        let staging = staging_path(&destination);
        let mut task = ActiveTask {
            job,
            url,
            destination,
            staging,
            wants_progress,
            file: None,
            stream: None,
            received: 0,
            status: DownloadStatus::Failure,
            done: false,
        };

        match open_staging(&task.staging) {
            Ok(file) => task.file = Some(BufWriter::new(file)),
            Err(err) => {
                warn!(target: "download", "无法创建暂存文件 {}: {err}", task.staging.display());
                task.done = true;
                self.active = Some(task);
                return Ok(());
            }
        }

        match self.transport.open(&task.url, auth_token.as_deref()) {
            Ok(stream) => {
                debug!(target: "download", url = %task.url, "开始下载");
                task.stream = Some(stream);
            }
            Err(err) => {
                warn!(target: "download", url = %task.url, "请求失败: {err}");
                task.done = true;
            }
        }

        self.active = Some(task);
        Ok(())
    }

    /// 协作式让出点：推进当前传输，并在结束时完成清理、交还结果。
    pub fn poll(&mut self) -> EnginePoll<J> {
        let Some(task) = self.active.as_mut() else {
            return EnginePoll::Idle;
        };

        if !task.done {
            pump(task, &self.cancel, self.disk.as_ref(), self.margin);
        }

        if task.done {
            return match self.active.take() {
                Some(task) => EnginePoll::Complete(finish(task)),
                None => EnginePoll::Idle,
            };
        }
        EnginePoll::InProgress(task.progress())
    }
}

impl<J> Drop for DownloadEngine<J> {
    fn drop(&mut self) {
        if let Some(mut task) = self.active.take() {
            task.stream.take();
            task.file.take();
            let _ = remove_if_exists(&task.staging);
        }
    }
}

fn open_staging(staging: &Path) -> io::Result<File> {
    if let Some(parent) = staging.parent() {
        fs::create_dir_all(parent)?;
    }
    File::create(staging)
}

fn pump<J>(task: &mut ActiveTask<J>, cancel: &AtomicBool, disk: &dyn DiskSpace, margin: u64) {
    if cancel.load(Ordering::SeqCst) {
        info!(target: "download", url = %task.url, "下载已取消");
        task.status = DownloadStatus::Cancelled;
        task.done = true;
        return;
    }

    let (Some(stream), Some(file)) = (task.stream.as_mut(), task.file.as_mut()) else {
        task.done = true;
        return;
    };

    for _ in 0..CHUNKS_PER_POLL {
        match stream.poll_chunk() {
            Ok(Chunk::Data(bytes)) => {
                if let Err(err) = file.write_all(&bytes) {
                    warn!(target: "download", "写入暂存文件失败 {}: {err}", task.staging.display());
                    task.done = true;
                    return;
                }
                task.received += bytes.len() as u64;
            }
            Ok(Chunk::Pending) => break,
            Ok(Chunk::Finished) => {
                task.status = DownloadStatus::Success;
                task.done = true;
                return;
            }
            Err(err) => {
                warn!(target: "download", url = %task.url, "传输失败: {err}");
                task.done = true;
                return;
            }
        }
    }

    // 剩余待写入量 + 安全余量 超过可用空间则中止
    if let Some(total) = stream.content_length() {
        let needed = total.saturating_sub(task.received).saturating_add(margin);
        match disk.available(&task.destination) {
            Ok(free) if needed > free => {
                warn!(
                    target: "download",
                    url = %task.url,
                    needed,
                    free,
                    "磁盘空间不足，中止下载"
                );
                task.status = DownloadStatus::NoSpace;
                task.done = true;
            }
            Ok(_) => {}
            Err(err) => debug!(target: "download", "无法查询剩余空间: {err}"),
        }
    }
}

fn finish<J>(mut task: ActiveTask<J>) -> Completed<J> {
    // 先释放传输句柄
    task.stream.take();

    let mut status = task.status;
    if let Some(mut file) = task.file.take()
        && let Err(err) = file.flush()
    {
        warn!(target: "download", "刷新暂存文件失败: {err}");
        status = DownloadStatus::Failure;
    }

    if status.is_success()
        && let Err(err) = promote(&task.staging, &task.destination)
    {
        warn!(
            target: "download",
            "重命名 {} -> {} 失败: {err}",
            task.staging.display(),
            task.destination.display()
        );
        status = DownloadStatus::Failure;
    }

    if !status.is_success()
        && let Err(err) = remove_if_exists(&task.staging)
    {
        warn!(target: "download", "删除暂存文件失败 {}: {err}", task.staging.display());
    }

    debug!(
        target: "download",
        url = %task.url,
        bytes = task.received,
        ?status,
        "下载结束"
    );

    Completed {
        job: task.job,
        status,
        destination: task.destination,
    }
}

fn promote(staging: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(staging, destination) {
        Ok(()) => Ok(()),
        // Windows 下目标已存在时 rename 会失败
        Err(_) if destination.exists() => {
            fs::remove_file(destination)?;
            fs::rename(staging, destination)
        }
        Err(err) => Err(err),
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::space::testing::FixedSpace;
    use crate::download::transport::testing::{Route, ScriptedTransport};

    const PLENTY: u64 = u64::MAX / 2;
    const MB: u64 = 1024 * 1024;

    fn engine(transport: &ScriptedTransport, free: u64) -> DownloadEngine<u32> {
        DownloadEngine::new(Box::new(transport.clone()), Box::new(FixedSpace(free)), 10 * MB)
    }

    fn drive(engine: &mut DownloadEngine<u32>) -> Completed<u32> {
        for _ in 0..10_000 {
            if let EnginePoll::Complete(done) = engine.poll() {
                return done;
            }
        }
        panic!("transfer never completed");
    }

    #[test]
    fn success_renames_staging_onto_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out/MagPi100.pdf");
        let transport = ScriptedTransport::default();
        transport.route("https://h/MagPi100.pdf", Route::body(vec![7u8; 10_000]).chunk(1000));

        let mut engine = engine(&transport, PLENTY);
        engine
            .start(DownloadRequest::new("https://h/MagPi100.pdf", &dest), 1)
            .unwrap();
        let done = drive(&mut engine);

        assert_eq!(done.job, 1);
        assert_eq!(done.status, DownloadStatus::Success);
        assert_eq!(fs::read(&dest).unwrap().len(), 10_000);
        assert!(!staging_path(&dest).exists());
        assert_eq!(engine.poll(), EnginePoll::Idle);
    }

    #[test]
    fn second_start_while_busy_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::default();
        transport.route("https://h/a", Route::body(b"aaaa".to_vec()).stalls(3));
        transport.serve("https://h/b", b"bbbb".to_vec());

        let mut engine = engine(&transport, PLENTY);
        engine
            .start(DownloadRequest::new("https://h/a", dir.path().join("a")), 1)
            .unwrap();
        let err = engine
            .start(DownloadRequest::new("https://h/b", dir.path().join("b")), 2)
            .unwrap_err();
        assert_eq!(err, EngineError::Busy);
        assert_eq!(engine.active_job(), Some(&1));

        assert_eq!(drive(&mut engine).status, DownloadStatus::Success);
        assert_eq!(transport.opened(), vec!["https://h/a".to_string()]);
    }

    #[test]
    fn refused_connection_leaves_destination_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("cat.xml");
        fs::write(&dest, b"previous").unwrap();
        let transport = ScriptedTransport::default();

        let mut engine = engine(&transport, PLENTY);
        engine
            .start(DownloadRequest::new("https://h/missing", &dest), 3)
            .unwrap();
        let done = drive(&mut engine);

        assert_eq!(done.status, DownloadStatus::Failure);
        assert_eq!(fs::read(&dest).unwrap(), b"previous");
        assert!(!staging_path(&dest).exists());
    }

    #[test]
    fn unwritable_staging_fails_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"file").unwrap();
        let transport = ScriptedTransport::default();
        transport.serve("https://h/x", b"x".to_vec());

        let mut engine = engine(&transport, PLENTY);
        engine
            .start(DownloadRequest::new("https://h/x", blocker.join("x.pdf")), 4)
            .unwrap();
        assert_eq!(drive(&mut engine).status, DownloadStatus::Failure);
        assert!(transport.opened().is_empty());
    }

    #[test]
    fn cancellation_is_observed_at_next_poll() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("big.pdf");
        let transport = ScriptedTransport::default();
        transport.route("https://h/big", Route::body(vec![1u8; 4096]).chunk(16).stalls(2));

        let mut engine = engine(&transport, PLENTY);
        engine
            .start(DownloadRequest::new("https://h/big", &dest).with_progress(), 5)
            .unwrap();
        assert!(matches!(engine.poll(), EnginePoll::InProgress(_)));
        engine.cancel();
        let done = drive(&mut engine);

        assert_eq!(done.status, DownloadStatus::Cancelled);
        assert!(!dest.exists());
        assert!(!staging_path(&dest).exists());
    }

    #[test]
    fn insufficient_space_aborts_with_no_space() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("huge.pdf");
        let transport = ScriptedTransport::default();
        transport.route(
            "https://h/huge",
            Route::body(vec![0u8; 2048]).chunk(1).declared_len(Some(500 * MB)),
        );

        let mut engine = engine(&transport, 100 * MB);
        engine
            .start(DownloadRequest::new("https://h/huge", &dest), 6)
            .unwrap();
        let done = drive(&mut engine);

        assert_eq!(done.status, DownloadStatus::NoSpace);
        assert!(!dest.exists());
        assert!(!staging_path(&dest).exists());
    }

    #[test]
    fn safety_margin_counts_against_free_space() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::default();
        transport.route("https://h/s", Route::body(vec![0u8; 1024]).stalls(1));

        // 1 KiB 文件，但剩余空间小于 10MB 余量
        let mut engine = engine(&transport, 5 * MB);
        engine
            .start(DownloadRequest::new("https://h/s", dir.path().join("s")), 7)
            .unwrap();
        assert_eq!(drive(&mut engine).status, DownloadStatus::NoSpace);
    }

    #[test]
    fn mid_transfer_error_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("broken.pdf");
        let transport = ScriptedTransport::default();
        transport.route("https://h/broken", Route::body(vec![9u8; 100]).chunk(10).fail_mid());

        let mut engine = engine(&transport, PLENTY);
        engine
            .start(DownloadRequest::new("https://h/broken", &dest), 8)
            .unwrap();
        assert_eq!(drive(&mut engine).status, DownloadStatus::Failure);
        assert!(!dest.exists());
        assert!(!staging_path(&dest).exists());
    }

    #[test]
    fn progress_is_reported_only_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::default();
        transport.route("https://h/p", Route::body(vec![0u8; 100]).stalls(1));
        transport.route(
            "https://h/q",
            Route::body(vec![0u8; 100]).stalls(1).declared_len(None),
        );

        let mut engine = engine(&transport, PLENTY);
        engine
            .start(DownloadRequest::new("https://h/p", dir.path().join("p")), 9)
            .unwrap();
        assert_eq!(engine.poll(), EnginePoll::InProgress(None));
        drive(&mut engine);

        engine
            .start(
                DownloadRequest::new("https://h/q", dir.path().join("q")).with_progress(),
                10,
            )
            .unwrap();
        assert_eq!(
            engine.poll(),
            EnginePoll::InProgress(Some(Progress::Indeterminate))
        );
        drive(&mut engine);
    }

    #[test]
    fn fraction_tracks_received_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::default();
        // 每次轮询最多 64 块，每块 1 字节：首轮后应为 64/128
        transport.route("https://h/f", Route::body(vec![0u8; 128]).chunk(1));

        let mut engine = engine(&transport, PLENTY);
        engine
            .start(
                DownloadRequest::new("https://h/f", dir.path().join("f")).with_progress(),
                11,
            )
            .unwrap();
        assert_eq!(
            engine.poll(),
            EnginePoll::InProgress(Some(Progress::Fraction(0.5)))
        );
        assert_eq!(drive(&mut engine).status, DownloadStatus::Success);
    }

    #[test]
    fn auth_token_is_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::default();
        transport.serve("https://h/c", b"c".to_vec());

        let mut engine = engine(&transport, PLENTY);
        engine
            .start(
                DownloadRequest::new("https://h/c", dir.path().join("c"))
                    .with_auth(Some("secret".to_string())),
                12,
            )
            .unwrap();
        drive(&mut engine);
        assert_eq!(
            transport.opened_with_tokens(),
            vec![("https://h/c".to_string(), Some("secret".to_string()))]
        );
    }
}
