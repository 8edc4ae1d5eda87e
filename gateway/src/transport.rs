//! 传输层抽象
//!
//! 提供 Transport trait 使会话与具体传输实现解耦，
//! 测试中也可以直接用内存管道构造会话。

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::warn;

use crate::error::{ProtocolError, Result};

/// 传输层抽象 trait
///
/// 服务端接受的连接只需要对端地址与读写分离。
pub trait Transport: Send + Sync + Sized {
    /// 读取端类型
    type Reader: AsyncRead + Unpin + Send + 'static;
    /// 写入端类型
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// 对端地址
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// 分离读写端
    ///
    /// 将连接分离为独立的读取端和写入端，会话的读循环与发送路径各持一端。
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// 传输层监听器抽象 trait（服务端使用）
pub trait TransportListener: Send + Sync + Sized {
    /// 对应的传输类型
    type Transport: Transport;

    /// 绑定地址并开始监听
    ///
    /// # Arguments
    /// * `addr` - 监听地址，格式为 "host:port"
    fn bind(addr: &str) -> impl std::future::Future<Output = Result<Self>> + Send;

    /// 接受新连接
    fn accept(&self) -> impl std::future::Future<Output = Result<Self::Transport>> + Send;
}

// ============================================================================
// TCP 实现
// ============================================================================

/// TCP 传输实现
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    peer_addr: Option<SocketAddr>,
}

impl Transport for TcpTransport {
    type Reader = OwnedReadHalf;
    type Writer = OwnedWriteHalf;

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        self.stream.into_split()
    }
}

impl TcpTransport {
    /// 从 accept 得到的 TcpStream 创建
    pub fn from_stream(stream: TcpStream, nodelay: bool) -> Self {
        let peer_addr = stream.peer_addr().ok();
        if let Err(e) = stream.set_nodelay(nodelay) {
            warn!(?peer_addr, "Failed to set TCP_NODELAY: {}", e);
        }
        Self { stream, peer_addr }
    }
}

/// TCP 监听器实现
pub struct TcpListener {
    listener: tokio::net::TcpListener,
    nodelay: bool,
}

impl TransportListener for TcpListener {
    type Transport = TcpTransport;

    async fn bind(addr: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(ProtocolError::Io)?;
        Ok(Self {
            listener,
            nodelay: true,
        })
    }

    async fn accept(&self) -> Result<TcpTransport> {
        let (stream, _addr) = self.listener.accept().await.map_err(ProtocolError::Io)?;
        Ok(TcpTransport::from_stream(stream, self.nodelay))
    }
}

impl TcpListener {
    /// 获取本地绑定地址
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 设置新连接的 nodelay 选项
    pub fn set_nodelay(&mut self, nodelay: bool) {
        self.nodelay = nodelay;
    }
}
