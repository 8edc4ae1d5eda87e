//! 消息分发
//!
//! 启动时把每种消息代码绑定到一个处理器类型，分发时通过 [`HandlerResolver`]
//! 取得处理器实例并调用。单条消息的失败只影响这条消息，不会中断会话。

use std::any::{type_name, Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use futures::FutureExt;
use tracing::{error, info, trace};

use crate::error::DispatchError;
use crate::message::{downcast_message, Message, MessageType};
use crate::registry::is_valid_code;
use crate::session::Session;

/// 处理器返回的 future
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// 处理器实例
pub type HandlerInstance = Arc<dyn Any + Send + Sync>;

type Invoker = Box<dyn Fn(HandlerInstance, Box<dyn Message>, Arc<Session>) -> HandlerFuture + Send + Sync>;

/// 分发结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// 处理成功
    Success,
    /// 处理器返回错误或发生 panic
    Failure,
    /// 没有绑定处理器
    Unhandled,
}

/// 处理一种消息的能力
pub trait MessageHandler<M: MessageType>: Send + Sync + 'static {
    fn handle(
        &self,
        message: M,
        session: Arc<Session>,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// 声明自身处理哪些消息的处理器类型
pub trait HandlerGroup: Sized + Send + Sync + 'static {
    fn bind(binder: &mut Binder<'_, Self>) -> Result<(), DispatchError>;
}

/// 为处理器类型 `H` 登记绑定
pub struct Binder<'a, H> {
    dispatcher: &'a mut MessageDispatcher,
    _owner: PhantomData<fn() -> H>,
}

impl<H: Send + Sync + 'static> Binder<'_, H> {
    /// 将消息 `M` 绑定到 `H`
    pub fn on<M>(&mut self) -> Result<&mut Self, DispatchError>
    where
        M: MessageType,
        H: MessageHandler<M>,
    {
        self.dispatcher.bind::<H, M>()?;
        Ok(self)
    }
}

/// 按类型取得处理器实例
pub trait HandlerResolver: Send + Sync {
    fn resolve(&self, owner: TypeId, name: &'static str) -> anyhow::Result<HandlerInstance>;
}

/// 以类型为键保存处理器单例
#[derive(Default)]
pub struct HandlerContainer {
    instances: HashMap<TypeId, HandlerInstance>,
}

impl HandlerContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记处理器实例
    pub fn with<H: Send + Sync + 'static>(mut self, handler: H) -> Self {
        self.insert(Arc::new(handler));
        self
    }

    /// 登记共享的处理器实例
    pub fn insert<H: Send + Sync + 'static>(&mut self, handler: Arc<H>) -> &mut Self {
        self.instances.insert(TypeId::of::<H>(), handler);
        self
    }
}

impl HandlerResolver for HandlerContainer {
    fn resolve(&self, owner: TypeId, name: &'static str) -> anyhow::Result<HandlerInstance> {
        match self.instances.get(&owner) {
            Some(instance) => Ok(Arc::clone(instance)),
            None => bail!("no instance of {} registered", name),
        }
    }
}

struct HandlerBinding {
    owner: TypeId,
    owner_name: &'static str,
    invoke: Invoker,
}

fn invoker<H, M>() -> Invoker
where
    H: MessageHandler<M>,
    M: MessageType,
{
    Box::new(
        |instance: HandlerInstance, message: Box<dyn Message>, session: Arc<Session>| -> HandlerFuture {
            Box::pin(async move {
                let owner = instance
                    .downcast::<H>()
                    .map_err(|_| anyhow!("handler instance is not a {}", type_name::<H>()))?;
                let message = downcast_message::<M>(message)
                    .ok_or_else(|| anyhow!("message is not a {}", M::name()))?;
                owner.handle(message, session).await
            })
        },
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// 消息分发器
pub struct MessageDispatcher {
    handlers: HashMap<&'static str, HandlerBinding>,
    resolver: Arc<dyn HandlerResolver>,
}

impl MessageDispatcher {
    pub fn new(resolver: Arc<dyn HandlerResolver>) -> Self {
        Self {
            handlers: HashMap::new(),
            resolver,
        }
    }

    /// 登记处理器类型声明的全部绑定
    pub fn register_handlers<H: HandlerGroup>(&mut self) -> Result<usize, DispatchError> {
        let before: HashSet<&'static str> = self.handlers.keys().copied().collect();
        let bound = H::bind(&mut Binder {
            dispatcher: self,
            _owner: PhantomData,
        });
        if let Err(e) = bound {
            self.handlers.retain(|code, _| before.contains(code));
            return Err(e);
        }

        let added = self.handlers.len() - before.len();
        info!("{} handlers registered for {}", added, type_name::<H>());
        Ok(added)
    }

    /// 将消息 `M` 绑定到处理器类型 `H`
    pub fn bind<H, M>(&mut self) -> Result<(), DispatchError>
    where
        H: MessageHandler<M>,
        M: MessageType,
    {
        let owner_name = type_name::<H>();
        let code = M::CODE;

        if !is_valid_code(code) {
            return Err(DispatchError::InvalidHandlerSignature {
                owner: owner_name,
                message: M::name(),
                reason: format!("message type declares no usable protocol code ({code:?})"),
            });
        }

        if let Some(existing) = self.handlers.get(code) {
            return Err(DispatchError::DuplicateHandler {
                code: code.to_string(),
                existing: existing.owner_name,
                owner: owner_name,
            });
        }

        self.handlers.insert(
            code,
            HandlerBinding {
                owner: TypeId::of::<H>(),
                owner_name,
                invoke: invoker::<H, M>(),
            },
        );
        Ok(())
    }

    pub fn is_bound(&self, code: &str) -> bool {
        self.handlers.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// 分发一条消息
    ///
    /// 处理器的错误和 panic 都会被捕获并记录，调用方只看到 [`DispatchResult`]。
    pub async fn dispatch(&self, message: Box<dyn Message>, session: &Arc<Session>) -> DispatchResult {
        let code = message.code();
        let Some(binding) = self.handlers.get(code) else {
            trace!(code, session = %session, "No handler bound");
            return DispatchResult::Unhandled;
        };

        let outcome = match self.resolver.resolve(binding.owner, binding.owner_name) {
            Ok(instance) => {
                let invocation = (binding.invoke)(instance, message, Arc::clone(session));
                AssertUnwindSafe(invocation)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| {
                        Err(anyhow!("handler panicked: {}", panic_message(payload.as_ref())))
                    })
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => DispatchResult::Success,
            Err(e) => {
                error!(
                    code,
                    session = %session,
                    handler = binding.owner_name,
                    "An error occurred while dispatching message: {:#}",
                    e
                );
                DispatchResult::Failure
            }
        }
    }
}
