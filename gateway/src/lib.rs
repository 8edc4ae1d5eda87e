//! 游戏协议网关核心库
//!
//! 包含:
//! - 消息抽象与注册表 (Message, MessageRegistry)
//! - 帧编解码 (FrameCodec, FrameBuffer)
//! - 消息分发 (MessageDispatcher, MessageHandler)
//! - 会话与服务端生命周期 (Session, Server, ServerHandler)
//! - 传输层抽象 (Transport trait)

mod codec;
mod constants;
mod dispatcher;
mod error;
mod message;
mod options;
mod registry;
mod server;
mod session;
mod sync;
mod transport;

#[cfg(test)]
mod test_support;

pub use codec::{FrameBuffer, FrameCodec};
pub use constants::*;
pub use dispatcher::{
    Binder, DispatchResult, HandlerContainer, HandlerFuture, HandlerGroup, HandlerInstance,
    HandlerResolver, MessageDispatcher, MessageHandler,
};
pub use error::{DispatchError, ProtocolError, RegistryError, Result};
pub use message::{downcast_message, AsAny, Message, MessageDescriptor, MessageType};
pub use options::TransportOptions;
pub use registry::MessageRegistry;
pub use server::{Server, ServerHandler, ServerState, SessionSet};
pub use session::{Session, SessionContext, SessionState};
pub use transport::{TcpListener, TcpTransport, Transport, TransportListener};
