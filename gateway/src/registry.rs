//! 消息注册表
//!
//! 启动时登记所有消息类型（代码 → 构造函数 + 显示名），之后只读。

use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::constants::MAX_CODE_LEN;
use crate::error::RegistryError;
use crate::message::{Message, MessageDescriptor, MessageType};

#[derive(Clone, Copy)]
struct MessageEntry {
    name: &'static str,
    constructor: fn() -> Box<dyn Message>,
}

/// 消息注册表
#[derive(Default)]
pub struct MessageRegistry {
    entries: HashMap<&'static str, MessageEntry>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一组消息类型
    ///
    /// 空代码的类型被跳过；重复代码或无效代码返回错误，
    /// 并撤销本次调用已登记的条目。
    pub fn register<I>(&mut self, descriptors: I) -> Result<usize, RegistryError>
    where
        I: IntoIterator<Item = MessageDescriptor>,
    {
        let before: HashSet<&'static str> = self.entries.keys().copied().collect();
        let mut added = 0;
        for descriptor in descriptors {
            match self.insert(descriptor) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => {
                    self.entries.retain(|code, _| before.contains(code));
                    return Err(e);
                }
            }
        }

        info!("{} messages registered ({} total)", added, self.entries.len());
        Ok(added)
    }

    /// 登记单个消息类型
    pub fn register_type<M: MessageType>(&mut self) -> Result<(), RegistryError> {
        self.insert(MessageDescriptor::of::<M>()).map(|_| ())
    }

    fn insert(&mut self, descriptor: MessageDescriptor) -> Result<bool, RegistryError> {
        let code = descriptor.code;
        if code.is_empty() {
            return Ok(false);
        }

        if !is_valid_code(code) {
            return Err(RegistryError::InvalidCode {
                code: code.to_string(),
                name: descriptor.name,
            });
        }

        if let Some(existing) = self.entries.get(code) {
            return Err(RegistryError::DuplicateCode {
                code: code.to_string(),
                existing: existing.name,
                name: descriptor.name,
            });
        }

        self.entries.insert(
            code,
            MessageEntry {
                name: descriptor.name,
                constructor: descriptor.constructor,
            },
        );
        Ok(true)
    }

    /// 按代码构造新的消息实例
    pub fn resolve(&self, code: &str) -> Option<Box<dyn Message>> {
        self.entries.get(code).map(|entry| (entry.constructor)())
    }

    /// 获取消息显示名（仅用于日志）
    pub fn display_name(&self, code: &str) -> Result<&'static str, RegistryError> {
        self.entries
            .get(code)
            .map(|entry| entry.name)
            .ok_or_else(|| RegistryError::NotFound {
                code: code.to_string(),
            })
    }

    pub fn contains(&self, code: &str) -> bool {
        self.entries.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 已登记的全部代码
    pub fn codes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }
}

/// 代码必须是 1–3 个 ASCII 字符
pub(crate) fn is_valid_code(code: &str) -> bool {
    !code.is_empty() && code.len() <= MAX_CODE_LEN && code.is_ascii()
}
