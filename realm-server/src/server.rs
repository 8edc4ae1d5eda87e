//! 认证服务端

use std::sync::{Arc, OnceLock};

use gateway::{ServerHandler, Session, SessionContext, SessionSet, TcpTransport};
use protocol::HelloConnectMessage;
use tracing::debug;

use crate::key::generate_key;

/// 认证服务端：连接建立后先发送带密钥的问候
#[derive(Default)]
pub struct RealmServer {
    /// 首次使用时生成，之后所有连接共用
    key: OnceLock<String>,
}

impl RealmServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(&self) -> &str {
        self.key.get_or_init(generate_key)
    }
}

impl ServerHandler for RealmServer {
    fn create_session(&self, transport: TcpTransport, context: &SessionContext) -> Session {
        Session::new(transport, context.clone())
    }

    async fn on_session_connected(&self, sessions: &SessionSet, session: Arc<Session>) {
        debug!(session = %session, "Sending hello");
        session.send(&HelloConnectMessage::new(self.key())).await;
        sessions.register(session).await;
    }
}
