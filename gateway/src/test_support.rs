//! 测试辅助：内存会话与记录型处理器

use std::sync::{Arc, Mutex};

use anyhow::bail;
use tokio::io::DuplexStream;

use crate::codec::FrameCodec;
use crate::dispatcher::{Binder, HandlerContainer, HandlerGroup, MessageDispatcher, MessageHandler};
use crate::error::DispatchError;
use crate::message::tests::{AccountMessage, AnyAMessage, BasicMessage, ChannelMessage};
use crate::message::MessageDescriptor;
use crate::options::TransportOptions;
use crate::registry::MessageRegistry;
use crate::session::{Session, SessionContext};

/// 记录收到的消息
#[derive(Default)]
pub(crate) struct Recorder {
    seen: Mutex<Vec<(String, String)>>,
}

impl Recorder {
    pub(crate) fn seen(&self) -> Vec<(String, String)> {
        self.seen.lock().unwrap().clone()
    }

    fn record(&self, code: &str, body: &str) {
        self.seen.lock().unwrap().push((code.to_string(), body.to_string()));
    }
}

impl MessageHandler<AccountMessage> for Recorder {
    async fn handle(&self, message: AccountMessage, _session: Arc<Session>) -> anyhow::Result<()> {
        self.record("AA", &message.body);
        Ok(())
    }
}

impl MessageHandler<BasicMessage> for Recorder {
    async fn handle(&self, message: BasicMessage, session: Arc<Session>) -> anyhow::Result<()> {
        self.record("BA", &message.body);
        if message.body == "quit" {
            session.disconnect();
            return Ok(());
        }

        let reply = BasicMessage {
            body: format!("echo:{}", message.body),
        };
        session.send(&reply).await;
        Ok(())
    }
}

impl MessageHandler<ChannelMessage> for Recorder {
    async fn handle(&self, _message: ChannelMessage, _session: Arc<Session>) -> anyhow::Result<()> {
        bail!("boom")
    }
}

impl MessageHandler<AnyAMessage> for Recorder {
    async fn handle(&self, _message: AnyAMessage, _session: Arc<Session>) -> anyhow::Result<()> {
        panic!("handler exploded")
    }
}

impl HandlerGroup for Recorder {
    fn bind(binder: &mut Binder<'_, Self>) -> Result<(), DispatchError> {
        binder
            .on::<AccountMessage>()?
            .on::<BasicMessage>()?
            .on::<ChannelMessage>()?
            .on::<AnyAMessage>()?;
        Ok(())
    }
}

pub(crate) fn test_registry() -> MessageRegistry {
    let mut registry = MessageRegistry::new();
    registry
        .register([
            MessageDescriptor::of::<AccountMessage>(),
            MessageDescriptor::of::<BasicMessage>(),
            MessageDescriptor::of::<ChannelMessage>(),
            MessageDescriptor::of::<AnyAMessage>(),
        ])
        .unwrap();
    registry
}

pub(crate) fn test_context(recorder: Arc<Recorder>) -> SessionContext {
    test_context_with(recorder, TransportOptions::default())
}

pub(crate) fn test_context_with(recorder: Arc<Recorder>, options: TransportOptions) -> SessionContext {
    let mut container = HandlerContainer::new();
    container.insert(recorder);

    let mut dispatcher = MessageDispatcher::new(Arc::new(container));
    dispatcher.register_handlers::<Recorder>().unwrap();

    SessionContext::new(FrameCodec::new(Arc::new(test_registry())), dispatcher, options)
}

/// 基于内存管道的会话，返回值第二项是客户端一侧
pub(crate) fn duplex_session(context: SessionContext) -> (Arc<Session>, DuplexStream) {
    let (server, client) = tokio::io::duplex(4096);
    let (reader, writer) = tokio::io::split(server);
    let session = Session::from_parts(reader, writer, None, context);
    (Arc::new(session), client)
}
