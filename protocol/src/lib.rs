//! 游戏协议消息定义
//!
//! 包含:
//! - 安全 (IdentificationMessage)
//! - 认证 (HelloConnectMessage)

mod authentication;
mod security;

use gateway::MessageDescriptor;

pub use authentication::HelloConnectMessage;
pub use security::IdentificationMessage;

/// 本协议的全部消息类型，交给注册表登记
pub fn messages() -> Vec<MessageDescriptor> {
    vec![
        MessageDescriptor::of::<IdentificationMessage>(),
        MessageDescriptor::of::<HelloConnectMessage>(),
    ]
}
