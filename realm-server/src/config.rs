//! 服务配置加载

use std::path::Path;

use anyhow::{Context, Result};
use gateway::TransportOptions;
use serde::Deserialize;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "realm.json";

/// 客户端版本
pub const DEFAULT_CLIENT_VERSION: &str = "1.12.0s";

/// 认证服务配置
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RealmConfig {
    /// 网络监听配置
    pub network: TransportOptions,
    /// 日志过滤，RUST_LOG 存在时以环境变量为准
    pub log_filter: Option<String>,
    /// 允许连接的客户端版本
    pub client_version: String,
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            network: TransportOptions::default(),
            log_filter: None,
            client_version: DEFAULT_CLIENT_VERSION.to_string(),
        }
    }
}

impl RealmConfig {
    /// 从 JSON 文件加载，文件不存在时使用默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}
