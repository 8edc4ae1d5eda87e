//! 安全类消息

use gateway::{Message, MessageType, ProtocolError, Result};

/// 客户端连接后发送的身份识别
///
/// 线路上没有代码前缀，由握手帧结尾标记识别。消息体为 `version\nusername\npassword`。
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IdentificationMessage {
    pub version: String,
    pub username: String,
    pub password: String,
}

impl Message for IdentificationMessage {
    fn code(&self) -> &'static str {
        Self::CODE
    }

    // 只入站
    fn serialize(&self) -> String {
        String::new()
    }

    fn deserialize(&mut self, body: &str) -> Result<()> {
        let mut parts = body.split('\n').map(|part| part.trim_matches('\0'));
        let mut next = |field: &str| {
            parts
                .next()
                .map(str::to_string)
                .ok_or_else(|| ProtocolError::malformed(Self::CODE, format!("missing {field}")))
        };

        self.version = next("version")?;
        self.username = next("username")?;
        self.password = next("password")?;
        Ok(())
    }
}

impl MessageType for IdentificationMessage {
    const CODE: &'static str = "HA";
}
