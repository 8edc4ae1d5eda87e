//! 消息处理器

use std::sync::Arc;

use gateway::{Binder, DispatchError, HandlerGroup, MessageHandler, Session};
use protocol::IdentificationMessage;
use tracing::{info, warn};

/// 认证处理器
pub struct AuthenticationHandler {
    expected_version: String,
}

impl AuthenticationHandler {
    pub fn new(expected_version: impl Into<String>) -> Self {
        Self {
            expected_version: expected_version.into(),
        }
    }
}

impl MessageHandler<IdentificationMessage> for AuthenticationHandler {
    async fn handle(&self, message: IdentificationMessage, session: Arc<Session>) -> anyhow::Result<()> {
        if !message.version.eq_ignore_ascii_case(&self.expected_version) {
            warn!(
                session = %session,
                version = %message.version,
                expected = %self.expected_version,
                "Client version mismatch, disconnecting"
            );
            session.disconnect();
            return Ok(());
        }

        info!(session = %session, username = %message.username, "Client identified");
        Ok(())
    }
}

impl HandlerGroup for AuthenticationHandler {
    fn bind(binder: &mut Binder<'_, Self>) -> Result<(), DispatchError> {
        binder.on::<IdentificationMessage>()?;
        Ok(())
    }
}
