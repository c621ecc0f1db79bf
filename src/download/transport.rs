//! HTTP 传输抽象与基于 reqwest 的实现。
//!
//! 引擎只依赖 `Transport`/`TransferStream`：`poll_chunk` 必须立即返回，
//! 阻塞的网络读取放在独立线程，通过有界通道把数据帧交回轮询方。

use std::io::Read;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, CONNECTION, HeaderMap, HeaderValue, USER_AGENT};
use thiserror::Error;
use tracing::debug;

const CHUNK_SIZE: usize = 16 * 1024;
const CHANNEL_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Data(Vec<u8>),
    Pending,
    Finished,
}

pub trait TransferStream {
    /// 服务端声明的总长度；响应头未到达或未声明时为 `None`。
    fn content_length(&self) -> Option<u64>;
    fn poll_chunk(&mut self) -> Result<Chunk, TransportError>;
}

pub trait Transport {
    fn open(
        &self,
        url: &str,
        auth_token: Option<&str>,
    ) -> Result<Box<dyn TransferStream>, TransportError>;
}

#[derive(Debug)]
enum Frame {
    Length(Option<u64>),
    Data(Vec<u8>),
    End,
    Failed(String),
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        // reqwest 未启用 gzip 解码，要求原样传输
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("bookshelf/", env!("CARGO_PKG_VERSION"))),
        );

        // 传输本身不设总超时，只能由取消或空间检查中断
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(connect_timeout)
            .timeout(None::<Duration>)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn open(
        &self,
        url: &str,
        auth_token: Option<&str>,
    ) -> Result<Box<dyn TransferStream>, TransportError> {
        let mut request = self.client.get(url);
        if let Some(token) = auth_token {
            request = request.bearer_auth(token);
        }

        let (tx, rx) = bounded(CHANNEL_DEPTH);
        let label = url.to_string();
        thread::Builder::new()
            .name("transfer".to_string())
            .spawn(move || pump_response(request, tx, &label))?;

        Ok(Box::new(HttpStream { rx, total: None }))
    }
}

fn pump_response(request: RequestBuilder, tx: Sender<Frame>, url: &str) {
    let resp = match request.send().and_then(|r| r.error_for_status()) {
        Ok(r) => r,
        Err(e) => {
            let _ = tx.send(Frame::Failed(e.to_string()));
            return;
        }
    };
    if tx.send(Frame::Length(resp.content_length())).is_err() {
        return;
    }

    let mut reader = resp;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                let _ = tx.send(Frame::End);
                return;
            }
            Ok(n) => {
                // 接收端已释放（任务被取消或中止）
                if tx.send(Frame::Data(buf[..n].to_vec())).is_err() {
                    debug!(target: "transport", "receiver dropped, stop reading {url}");
                    return;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.send(Frame::Failed(e.to_string()));
                return;
            }
        }
    }
}

struct HttpStream {
    rx: Receiver<Frame>,
    total: Option<u64>,
}

impl TransferStream for HttpStream {
    fn content_length(&self) -> Option<u64> {
        self.total
    }

    fn poll_chunk(&mut self) -> Result<Chunk, TransportError> {
        loop {
            match self.rx.try_recv() {
                Ok(Frame::Length(len)) => self.total = len,
                Ok(Frame::Data(bytes)) => return Ok(Chunk::Data(bytes)),
                Ok(Frame::End) => return Ok(Chunk::Finished),
                Ok(Frame::Failed(msg)) => return Err(TransportError::Request(msg)),
                Err(TryRecvError::Empty) => return Ok(Chunk::Pending),
                Err(TryRecvError::Disconnected) => {
                    return Err(TransportError::Request(
                        "transfer worker exited unexpectedly".to_string(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 按 URL 预设响应的脚本化传输，供引擎与调度测试使用。

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Clone)]
    pub(crate) struct Route {
        pub body: Vec<u8>,
        pub declared_len: Option<u64>,
        /// 首个数据块之前返回多少次 `Pending`
        pub stalls: usize,
        pub chunk: usize,
        pub fail_mid: bool,
    }

    impl Route {
        pub fn body(body: impl Into<Vec<u8>>) -> Self {
            let body = body.into();
            Self {
                declared_len: Some(body.len() as u64),
                body,
                stalls: 0,
                chunk: 4096,
                fail_mid: false,
            }
        }

        pub fn stalls(mut self, n: usize) -> Self {
            self.stalls = n;
            self
        }

        pub fn declared_len(mut self, len: Option<u64>) -> Self {
            self.declared_len = len;
            self
        }

        pub fn chunk(mut self, size: usize) -> Self {
            self.chunk = size.max(1);
            self
        }

        pub fn fail_mid(mut self) -> Self {
            self.fail_mid = true;
            self
        }
    }

    #[derive(Default)]
    struct ScriptState {
        routes: HashMap<String, Route>,
        opened: Vec<(String, Option<String>)>,
    }

    #[derive(Clone, Default)]
    pub(crate) struct ScriptedTransport {
        state: Arc<Mutex<ScriptState>>,
    }

    impl ScriptedTransport {
        pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
            self.route(url, Route::body(body));
        }

        pub fn route(&self, url: &str, route: Route) {
            self.state
                .lock()
                .unwrap()
                .routes
                .insert(url.to_string(), route);
        }

        pub fn opened(&self) -> Vec<String> {
            self.state
                .lock()
                .unwrap()
                .opened
                .iter()
                .map(|(u, _)| u.clone())
                .collect()
        }

        pub fn opened_with_tokens(&self) -> Vec<(String, Option<String>)> {
            self.state.lock().unwrap().opened.clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn open(
            &self,
            url: &str,
            auth_token: Option<&str>,
        ) -> Result<Box<dyn TransferStream>, TransportError> {
            let mut state = self.state.lock().unwrap();
            state
                .opened
                .push((url.to_string(), auth_token.map(str::to_string)));
            let Some(route) = state.routes.get(url).cloned() else {
                return Err(TransportError::Request(format!(
                    "connection refused: {url}"
                )));
            };
            Ok(Box::new(ScriptedStream {
                route,
                offset: 0,
                stalls_left: 0,
                started: false,
            }))
        }
    }

    struct ScriptedStream {
        route: Route,
        offset: usize,
        stalls_left: usize,
        started: bool,
    }

    impl TransferStream for ScriptedStream {
        fn content_length(&self) -> Option<u64> {
            if self.started { self.route.declared_len } else { None }
        }

        fn poll_chunk(&mut self) -> Result<Chunk, TransportError> {
            if !self.started {
                self.started = true;
                self.stalls_left = self.route.stalls;
            }
            if self.stalls_left > 0 {
                self.stalls_left -= 1;
                return Ok(Chunk::Pending);
            }
            if self.offset >= self.route.body.len() {
                return Ok(Chunk::Finished);
            }
            if self.route.fail_mid && self.offset > 0 {
                return Err(TransportError::Request("connection reset".to_string()));
            }
            let end = (self.offset + self.route.chunk).min(self.route.body.len());
            let data = self.route.body[self.offset..end].to_vec();
            self.offset = end;
            Ok(Chunk::Data(data))
        }
    }
}
