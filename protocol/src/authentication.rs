//! 认证类消息

use gateway::{Message, MessageType, Result};

/// 服务端在连接建立后发送的问候，携带本次认证使用的密钥
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HelloConnectMessage {
    pub key: String,
}

impl HelloConnectMessage {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Message for HelloConnectMessage {
    fn code(&self) -> &'static str {
        Self::CODE
    }

    fn serialize(&self) -> String {
        format!("{}{}", Self::CODE, self.key)
    }

    fn deserialize(&mut self, body: &str) -> Result<()> {
        self.key = body.to_string();
        Ok(())
    }
}

impl MessageType for HelloConnectMessage {
    const CODE: &'static str = "HC";
}
