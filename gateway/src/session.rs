//! 会话
//!
//! 每个连接一个会话：读循环拉取数据、解码并按顺序分发，发送路径编码后写出。
//! 读写两端分开持有，写端由公平的异步锁串行化，保证帧不会交错。

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, error, warn, Level};
use uuid::Uuid;

use crate::codec::{FrameBuffer, FrameCodec};
use crate::dispatcher::{DispatchResult, MessageDispatcher};
use crate::error::{ProtocolError, Result};
use crate::message::Message;
use crate::options::TransportOptions;
use crate::sync::lock;
use crate::transport::Transport;
use crate::READ_CHUNK_SIZE;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 已建立，尚未开始读取
    Connected,
    /// 读循环运行中
    Reading,
    /// 已请求断开
    Disconnecting,
    /// 资源已释放
    Closed,
}

/// 会话共享的编解码器、分发器与配置
#[derive(Clone)]
pub struct SessionContext {
    codec: Arc<FrameCodec>,
    dispatcher: Arc<MessageDispatcher>,
    options: Arc<TransportOptions>,
}

impl SessionContext {
    pub fn new(codec: FrameCodec, dispatcher: MessageDispatcher, options: TransportOptions) -> Self {
        Self {
            codec: Arc::new(codec),
            dispatcher: Arc::new(dispatcher),
            options: Arc::new(options),
        }
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.dispatcher
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }
}

/// 客户端会话
pub struct Session {
    id: OnceLock<String>,
    peer_addr: Option<SocketAddr>,
    context: SessionContext,
    reader: AsyncMutex<Option<BoxedReader>>,
    writer: AsyncMutex<Option<BoxedWriter>>,
    /// 断开信号，只会从 false 变为 true 一次
    closed: watch::Sender<bool>,
    state: Mutex<SessionState>,
    detached: AtomicBool,
    disposed: AtomicBool,
    receive_error: Mutex<Option<ProtocolError>>,
    send_error: Mutex<Option<ProtocolError>>,
}

impl Session {
    /// 从传输层创建会话
    pub fn new<T: Transport>(transport: T, context: SessionContext) -> Self {
        let peer_addr = transport.peer_addr();
        let (reader, writer) = transport.split();
        Self::from_parts(reader, writer, peer_addr, context)
    }

    /// 从读写端直接创建会话
    pub fn from_parts<R, W>(
        reader: R,
        writer: W,
        peer_addr: Option<SocketAddr>,
        context: SessionContext,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed, _) = watch::channel(false);
        Self {
            id: OnceLock::new(),
            peer_addr,
            context,
            reader: AsyncMutex::new(Some(Box::new(reader))),
            writer: AsyncMutex::new(Some(Box::new(writer))),
            closed,
            state: Mutex::new(SessionState::Connected),
            detached: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            receive_error: Mutex::new(None),
            send_error: Mutex::new(None),
        }
    }

    /// 会话唯一标识，首次使用时生成
    pub fn id(&self) -> &str {
        self.id.get_or_init(|| Uuid::new_v4().simple().to_string())
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// 是否已请求断开
    pub fn is_closing(&self) -> bool {
        *self.closed.borrow()
    }

    /// 读循环记录的错误
    pub fn receive_error(&self) -> Option<String> {
        lock(&self.receive_error).as_ref().map(ToString::to_string)
    }

    /// 发送路径记录的最后一个错误
    pub fn send_error(&self) -> Option<String> {
        lock(&self.send_error).as_ref().map(ToString::to_string)
    }

    /// 等待会话被断开
    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    fn set_state(&self, next: SessionState) {
        let mut state = lock(&self.state);
        if *state != SessionState::Closed {
            *state = next;
        }
    }

    /// 运行读循环，直到被断开或对端关闭
    ///
    /// 循环内的任何错误都被记录为接收错误，不会向上传播。
    pub async fn run(self: &Arc<Self>) {
        let reader = self.reader.lock().await.take();
        let Some(mut reader) = reader else {
            warn!(session = %self, "Receive loop already started or session released");
            return;
        };

        if self.is_closing() {
            return;
        }
        self.set_state(SessionState::Reading);

        if let Err(e) = self.receive(&mut reader).await {
            error!(session = %self, "An error occurred while receiving data: {}", e);
            *lock(&self.receive_error) = Some(e);
        }

        self.disconnect();
    }

    async fn receive(self: &Arc<Self>, reader: &mut BoxedReader) -> Result<()> {
        let mut frames = FrameBuffer::new(self.context.options.max_frame_size);
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        loop {
            if self.is_closing() {
                debug!(session = %self, "Receive loop cancelled");
                return Ok(());
            }

            let read = tokio::select! {
                biased;
                _ = self.closed() => {
                    debug!(session = %self, "Receive loop cancelled");
                    return Ok(());
                }
                result = reader.read(&mut chunk) => result?,
            };

            // 对端关闭
            if read == 0 {
                if !frames.is_empty() {
                    return Err(ProtocolError::IncompleteMessage {
                        remaining: frames.remaining(),
                    });
                }
                return Ok(());
            }

            frames.extend(&chunk[..read])?;
            let Some(complete) = frames.take_complete() else {
                continue;
            };

            for message in self.context.codec.decode(&complete)? {
                // 处理器可能已断开会话，剩余消息不再分发
                if self.is_closing() {
                    break;
                }
                let code = message.code();
                let result = self.context.dispatcher.dispatch(message, self).await;
                self.log_dispatch(code, result);
            }
        }
    }

    fn log_dispatch(&self, code: &'static str, result: DispatchResult) {
        if !self.context.options.log_messages || !tracing::enabled!(Level::DEBUG) {
            return;
        }

        // 仅用于日志，查不到显示名时退回代码
        let name = self.context.codec.registry().display_name(code).unwrap_or(code);
        match result {
            DispatchResult::Success => {
                debug!(session = %self, message = name, "Session received message")
            }
            DispatchResult::Unhandled => debug!(
                session = %self,
                message = name,
                "Session received message but no handler was found for it"
            ),
            DispatchResult::Failure => debug!(
                session = %self,
                message = name,
                "Session received message but an error occurred while dispatching it"
            ),
        }
    }

    /// 发送一条消息
    ///
    /// 会话关闭中时什么也不做；写入被取消会触发断开，其他写入错误只记录不返回。
    pub async fn send(&self, message: &dyn Message) {
        if self.is_closing() {
            return;
        }

        let frame = self.context.codec.encode(message);
        let outcome = tokio::select! {
            result = self.write_frame(&frame) => Some(result),
            _ = self.closed() => None,
        };

        match outcome {
            Some(Ok(())) => {
                if self.context.options.log_messages {
                    debug!(session = %self, code = message.code(), "Session sent message");
                }
            }
            Some(Err(e)) => {
                error!(session = %self, "An error occurred while sending data: {}", e);
                *lock(&self.send_error) = Some(e);
            }
            None => {
                debug!(session = %self, "Send cancelled");
                self.disconnect();
            }
        }
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Ok(());
        };

        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// 断开会话，取消挂起的读写（幂等）
    pub fn disconnect(&self) {
        let changed = self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });

        if changed {
            self.set_state(SessionState::Disconnecting);
            debug!(session = %self, "Session disconnecting");
        }
    }

    /// 释放会话资源（幂等）
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.disconnect();

        // 读循环未启动时读端仍在这里
        drop(self.reader.lock().await.take());
        if let Some(e) = lock(&self.receive_error).as_ref() {
            debug!(session = %self, "Read side completed with error: {}", e);
        }

        // 写失败过的连接直接丢弃写端，不再尝试正常关闭
        let send_error = self.send_error();
        let writer = self.writer.lock().await.take();
        match (writer, send_error) {
            (Some(_), Some(e)) => {
                debug!(session = %self, "Write side aborted after error: {}", e);
            }
            (Some(mut writer), None) => {
                if let Err(e) = writer.shutdown().await {
                    debug!(session = %self, "Failed to shut down write side: {}", e);
                }
            }
            (None, _) => {}
        }

        *lock(&self.state) = SessionState::Closed;
        debug!(session = %self, "Session disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// 标记已从服务端摘除，只有第一次调用返回 true
    pub(crate) fn mark_detached(&self) -> bool {
        !self.detached.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}
