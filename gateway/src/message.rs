//! 消息抽象
//!
//! 每个协议单元实现 [`Message`]，并通过 [`MessageType`] 声明静态代码。
//! 解码路径由注册表按代码构造实例，编码路径由业务代码直接构造。

use std::any::{type_name, Any};
use std::fmt;

use crate::error::Result;

/// 将装箱的消息转换为 `Any`，用于分发时还原具体类型
pub trait AsAny: Any + Send {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Any + Send> AsAny for T {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// 网络消息
pub trait Message: AsAny + Sync + fmt::Debug {
    /// 协议代码（1–3 个 ASCII 字符）
    fn code(&self) -> &'static str;

    /// 序列化为线路上的消息体
    fn serialize(&self) -> String;

    /// 从去掉代码后的消息体填充字段
    fn deserialize(&mut self, body: &str) -> Result<()>;
}

/// 具有静态代码的具体消息类型
pub trait MessageType: Message + Default + Sized {
    /// 协议代码，空字符串表示不参与注册
    const CODE: &'static str;

    /// 用于日志的显示名
    fn name() -> &'static str {
        short_type_name::<Self>()
    }
}

/// 将动态消息还原为具体类型
pub fn downcast_message<M: MessageType>(message: Box<dyn Message>) -> Option<M> {
    message.into_any().downcast::<M>().ok().map(|boxed| *boxed)
}

pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

fn construct<M: MessageType>() -> Box<dyn Message> {
    Box::new(M::default())
}

/// 消息类型描述，注册表通过一组描述完成扫描
#[derive(Clone, Copy)]
pub struct MessageDescriptor {
    pub(crate) code: &'static str,
    pub(crate) name: &'static str,
    pub(crate) constructor: fn() -> Box<dyn Message>,
}

impl MessageDescriptor {
    /// 描述消息类型 `M`
    pub fn of<M: MessageType>() -> Self {
        Self {
            code: M::CODE,
            name: M::name(),
            constructor: construct::<M>,
        }
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for MessageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDescriptor")
            .field("code", &self.code)
            .field("name", &self.name)
            .finish()
    }
}
