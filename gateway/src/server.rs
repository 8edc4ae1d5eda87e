//! 服务端
//!
//! 监听端口、接受连接、为每个连接创建会话并驱动生命周期钩子。
//! 每个连接在独立任务中依次执行：连接钩子 → 读循环 → 断开钩子，接受循环不会被阻塞。

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, OnceLock};

use futures::future::join_all;
use tokio::sync::{watch, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{ProtocolError, Result};
use crate::session::{Session, SessionContext};
use crate::sync::lock;
use crate::transport::{TcpListener, TcpTransport, Transport, TransportListener};
use crate::SHUTDOWN_TIMEOUT;

/// 具体服务端的行为
///
/// 只有 `create_session` 必须实现，其余钩子都有默认行为。
pub trait ServerHandler: Send + Sync + Sized + 'static {
    /// 为新连接创建会话
    fn create_session(&self, transport: TcpTransport, context: &SessionContext) -> Session;

    /// 开始监听后调用
    fn on_server_started(&self, local_addr: SocketAddr) -> impl Future<Output = ()> + Send {
        async move {
            info!(%local_addr, "Server started");
        }
    }

    /// 会话建立后、读循环开始前调用，默认加入在线会话集合
    fn on_session_connected(
        &self,
        sessions: &SessionSet,
        session: Arc<Session>,
    ) -> impl Future<Output = ()> + Send {
        sessions.register(session)
    }

    /// 会话结束后调用，默认从在线会话集合移除
    fn on_session_disconnected(
        &self,
        sessions: &SessionSet,
        session: Arc<Session>,
    ) -> impl Future<Output = ()> + Send {
        sessions.unregister(session)
    }

    /// 停止服务时调用，默认并发断开所有会话并清空集合
    fn on_server_stopped(&self, sessions: &SessionSet) -> impl Future<Output = ()> + Send {
        sessions.teardown(self)
    }
}

// ============================================================================
// 在线会话集合
// ============================================================================

#[derive(Default)]
struct Reservations {
    total: usize,
    per_ip: HashMap<IpAddr, usize>,
}

/// 在线会话集合与连接数统计
pub struct SessionSet {
    /// session_id -> Session
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    reservations: Mutex<Reservations>,
    /// 当前占用的连接数
    active: watch::Sender<usize>,
    max_connections: usize,
    max_connections_per_ip: usize,
}

impl SessionSet {
    /// 创建集合，上限为 0 表示不限制
    pub fn new(max_connections: usize, max_connections_per_ip: usize) -> Self {
        let (active, _) = watch::channel(0);
        Self {
            sessions: RwLock::new(HashMap::new()),
            reservations: Mutex::new(Reservations::default()),
            active,
            max_connections,
            max_connections_per_ip,
        }
    }

    /// 加入会话
    pub async fn register(&self, session: Arc<Session>) {
        let id = session.id().to_string();
        let peer = session.peer_addr();
        let count = {
            let mut sessions = self.sessions.write().await;
            sessions.insert(id.clone(), session);
            sessions.len()
        };
        info!(session = %id, ?peer, online = count, "Session connected");
    }

    /// 移除会话
    pub async fn unregister(&self, session: Arc<Session>) {
        let removed = self.sessions.write().await.remove(session.id());
        if removed.is_some() {
            info!(session = %session, "Session disconnected");
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// 当前所有会话的快照
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn clear(&self) {
        self.sessions.write().await.clear();
    }

    /// 并发断开并释放所有会话，然后清空集合
    pub async fn teardown<H: ServerHandler>(&self, handler: &H) {
        let sessions = self.snapshot().await;
        if !sessions.is_empty() {
            info!("Tearing down {} sessions", sessions.len());
        }

        join_all(sessions.iter().map(|session| async move {
            session.disconnect();
            self.detach(handler, session).await;
        }))
        .await;

        self.clear().await;
    }

    /// 执行断开钩子并释放会话，每个会话只会执行一次
    pub(crate) async fn detach<H: ServerHandler>(&self, handler: &H, session: &Arc<Session>) {
        if !session.mark_detached() {
            return;
        }

        handler.on_session_disconnected(self, Arc::clone(session)).await;
        session.dispose().await;
        self.release(session.peer_addr().map(|addr| addr.ip()));
    }

    /// 占用一个连接名额，超出上限时返回 false
    pub fn try_reserve(&self, ip: Option<IpAddr>) -> bool {
        let mut reservations = lock(&self.reservations);

        if self.max_connections > 0 && reservations.total >= self.max_connections {
            return false;
        }
        if let Some(ip) = ip {
            let per_ip = reservations.per_ip.get(&ip).copied().unwrap_or(0);
            if self.max_connections_per_ip > 0 && per_ip >= self.max_connections_per_ip {
                return false;
            }
            reservations.per_ip.insert(ip, per_ip + 1);
        }

        reservations.total += 1;
        self.active.send_replace(reservations.total);
        true
    }

    /// 归还连接名额
    pub fn release(&self, ip: Option<IpAddr>) {
        let mut reservations = lock(&self.reservations);

        if let Some(ip) = ip {
            if let Some(count) = reservations.per_ip.get_mut(&ip) {
                *count -= 1;
                if *count == 0 {
                    reservations.per_ip.remove(&ip);
                }
            }
        }

        reservations.total = reservations.total.saturating_sub(1);
        self.active.send_replace(reservations.total);
    }

    /// 当前占用的连接数（含尚未加入集合的连接）
    pub fn active_connections(&self) -> usize {
        *self.active.borrow()
    }

    /// 等待所有连接名额归还
    async fn drained(&self) {
        let mut active = self.active.subscribe();
        let _ = active.wait_for(|count| *count == 0).await;
    }
}

// ============================================================================
// 服务端
// ============================================================================

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

/// 服务端状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Listening,
    Stopped,
}

struct Shared<H> {
    handler: H,
    sessions: SessionSet,
    /// 关闭信号
    shutdown: watch::Sender<bool>,
}

/// 监听一个端点的服务端
pub struct Server<H: ServerHandler> {
    shared: Arc<Shared<H>>,
    context: SessionContext,
    listener: Mutex<Option<TcpListener>>,
    local_addr: OnceLock<SocketAddr>,
    state: Mutex<ServerState>,
}

impl<H: ServerHandler> Server<H> {
    pub fn new(handler: H, context: SessionContext) -> Self {
        let options = context.options();
        let sessions = SessionSet::new(options.max_connections, options.max_connections_per_ip);
        let (shutdown, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                handler,
                sessions,
                shutdown,
            }),
            context,
            listener: Mutex::new(None),
            local_addr: OnceLock::new(),
            state: Mutex::new(ServerState::Idle),
        }
    }

    pub fn handler(&self) -> &H {
        &self.shared.handler
    }

    pub fn sessions(&self) -> &SessionSet {
        &self.shared.sessions
    }

    /// 实际绑定的地址，监听前为 None
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn state(&self) -> ServerState {
        *lock(&self.state)
    }

    /// 绑定配置中的地址并执行启动钩子
    pub async fn listen(&self) -> Result<SocketAddr> {
        {
            let mut state = lock(&self.state);
            if *state != ServerState::Idle {
                return Err(ProtocolError::AlreadyStarted);
            }
            *state = ServerState::Listening;
        }

        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                *lock(&self.state) = ServerState::Idle;
                return Err(e);
            }
        };

        let local_addr = listener.local_addr()?;
        let _ = self.local_addr.set(local_addr);
        *lock(&self.listener) = Some(listener);
        info!("Server listening on {}", local_addr);

        self.shared.handler.on_server_started(local_addr).await;
        Ok(local_addr)
    }

    async fn bind(&self) -> Result<TcpListener> {
        let options = self.context.options();
        let endpoint = options.endpoint()?;
        let mut listener = TcpListener::bind(&endpoint.to_string()).await?;
        listener.set_nodelay(options.nodelay);
        Ok(listener)
    }

    /// 接受连接直到服务停止
    ///
    /// accept 失败会结束接受循环并返回错误。
    pub async fn run(&self) -> Result<()> {
        let listener = lock(&self.listener).take().ok_or(ProtocolError::NotListening)?;
        let mut shutdown = self.shared.shutdown.subscribe();

        loop {
            let transport = tokio::select! {
                _ = stopped(&mut shutdown) => break,
                result = listener.accept() => match result {
                    Ok(transport) => transport,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        return Err(e);
                    }
                },
            };
            self.accept(transport);
        }

        debug!("Accept loop stopped");
        Ok(())
    }

    /// 监听并接受连接
    pub async fn start(&self) -> Result<()> {
        self.listen().await?;
        self.run().await
    }

    fn accept(&self, transport: TcpTransport) {
        let peer = transport.peer_addr();
        let shared = Arc::clone(&self.shared);

        if !shared.sessions.try_reserve(peer.map(|addr| addr.ip())) {
            warn!(?peer, "Connection limit reached, rejecting new connection");
            return;
        }

        let session = Arc::new(shared.handler.create_session(transport, &self.context));
        debug!(session = %session, ?peer, "Connection accepted");

        tokio::spawn(async move {
            shared
                .handler
                .on_session_connected(&shared.sessions, Arc::clone(&session))
                .await;

            // 停止期间建立的连接不再读取
            let stopping = *shared.shutdown.borrow();
            if !stopping {
                session.run().await;
            }

            shared.sessions.detach(&shared.handler, &session).await;
        });
    }

    /// 停止接受连接并断开所有会话
    pub async fn stop(&self) {
        {
            let mut state = lock(&self.state);
            if *state == ServerState::Stopped {
                return;
            }
            *state = ServerState::Stopped;
        }

        info!("Server stopping");
        self.shared.shutdown.send_replace(true);
        drop(lock(&self.listener).take());

        self.shared.handler.on_server_stopped(&self.shared.sessions).await;

        // 等待仍在建立中的连接结束
        if timeout(SHUTDOWN_TIMEOUT, self.shared.sessions.drained()).await.is_err() {
            warn!(
                "Shutdown timeout, {} connections still active",
                self.shared.sessions.active_connections()
            );
        }

        info!("Server shutdown complete");
    }
}
