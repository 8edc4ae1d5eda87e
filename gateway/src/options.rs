//! 服务端传输配置

use std::net::{IpAddr, SocketAddr};

use serde::Deserialize;

use crate::constants::{DEFAULT_PORT, MAX_FRAME_SIZE};
use crate::error::{ProtocolError, Result};

/// 服务端传输配置
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransportOptions {
    /// 监听 IP
    pub address: String,
    /// 监听端口，0 表示由系统分配
    pub port: u16,
    /// 最大连接数，0 表示不限制
    pub max_connections: usize,
    /// 单个 IP 的最大连接数，0 表示不限制
    pub max_connections_per_ip: usize,
    /// 是否以 debug 级别记录收发的消息
    pub log_messages: bool,
    /// 是否禁用 Nagle 算法
    pub nodelay: bool,
    /// 未完成帧的最大缓存字节数
    pub max_frame_size: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_connections: 0,
            max_connections_per_ip: 0,
            log_messages: false,
            nodelay: true,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl TransportOptions {
    /// 解析监听地址
    pub fn endpoint(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .address
            .parse()
            .map_err(|_| ProtocolError::InvalidEndpoint {
                address: self.address.clone(),
                port: self.port,
            })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let options: TransportOptions =
            serde_json::from_str(r#"{ "port": 0, "log_messages": true }"#).unwrap();

        assert_eq!(options.port, 0);
        assert!(options.log_messages);
        assert_eq!(options.address, "127.0.0.1");
        assert_eq!(options.max_frame_size, MAX_FRAME_SIZE);
    }

    #[test]
    fn test_endpoint() {
        let options = TransportOptions {
            address: "0.0.0.0".to_string(),
            port: 443,
            ..Default::default()
        };
        assert_eq!(options.endpoint().unwrap().to_string(), "0.0.0.0:443");
    }

    #[test]
    fn test_invalid_endpoint() {
        let options = TransportOptions {
            address: "localhost".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            options.endpoint(),
            Err(ProtocolError::InvalidEndpoint { .. })
        ));
    }
}
