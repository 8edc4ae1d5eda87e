//! 错误类型定义

use thiserror::Error;

/// 协议/传输错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 消息体无法反序列化
    #[error("Malformed message {code}: {reason}")]
    Malformed { code: String, reason: String },

    /// 连接关闭时仍有未完成的帧
    #[error("Incomplete message received: {remaining} bytes left undecoded")]
    IncompleteMessage { remaining: usize },

    /// 帧大小超限
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// 监听地址无效
    #[error("Invalid endpoint {address}:{port}")]
    InvalidEndpoint { address: String, port: u16 },

    /// 服务端已经启动过
    #[error("Server has already been started")]
    AlreadyStarted,

    /// 服务端尚未监听
    #[error("Server is not listening")]
    NotListening,
}

impl ProtocolError {
    /// 构造反序列化错误
    pub fn malformed(code: impl Into<String>, reason: impl Into<String>) -> Self {
        ProtocolError::Malformed {
            code: code.into(),
            reason: reason.into(),
        }
    }
}

/// 消息注册表错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// 同一代码被注册两次
    #[error("Message code {code} is already registered by {existing} (while registering {name})")]
    DuplicateCode {
        code: String,
        existing: &'static str,
        name: &'static str,
    },

    /// 代码超长或包含非 ASCII 字符
    #[error("Message {name} declares an invalid code {code:?}")]
    InvalidCode { code: String, name: &'static str },

    /// 代码未注册
    #[error("Message with code {code} not found")]
    NotFound { code: String },
}

/// 分发器注册错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// 同一代码绑定了两个处理器
    #[error("A handler for {code} is already registered by {existing} (while registering {owner})")]
    DuplicateHandler {
        code: String,
        existing: &'static str,
        owner: &'static str,
    },

    /// 处理器签名不合法
    #[error("Handler {owner} for {message} has an invalid signature: {reason}")]
    InvalidHandlerSignature {
        owner: &'static str,
        message: &'static str,
        reason: String,
    },
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
