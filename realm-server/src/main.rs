//! 认证服务
//!
//! 基于 Tokio 的异步 TCP 服务器，负责客户端握手与身份识别

mod config;
mod handlers;
mod key;
mod server;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use config::{RealmConfig, DEFAULT_CONFIG_PATH};
use gateway::{FrameCodec, HandlerContainer, MessageDispatcher, MessageRegistry, Server, SessionContext};
use handlers::AuthenticationHandler;
use server::RealmServer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "realm_server=debug,gateway=info";

/// 组装消息注册表、处理器与服务端
fn build_server(config: &RealmConfig) -> Result<Server<RealmServer>> {
    let mut registry = MessageRegistry::new();
    registry
        .register(protocol::messages())
        .context("failed to register protocol messages")?;

    let container =
        HandlerContainer::new().with(AuthenticationHandler::new(config.client_version.clone()));
    let mut dispatcher = MessageDispatcher::new(Arc::new(container));
    dispatcher
        .register_handlers::<AuthenticationHandler>()
        .context("failed to register handlers")?;

    let context = SessionContext::new(
        FrameCodec::new(Arc::new(registry)),
        dispatcher,
        config.network.clone(),
    );
    Ok(Server::new(RealmServer::new(), context))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = RealmConfig::load(&config_path)?;

    // 初始化日志，RUST_LOG 优先
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER))?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !Path::new(&config_path).exists() {
        warn!(path = %config_path, "Config file not found, using defaults");
    }

    let server = build_server(&config)?;
    server.listen().await?;
    info!("Realm Server started, press Ctrl+C to stop");

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, initiating graceful shutdown...");
        }
    }

    server.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn start() -> (Arc<Server<RealmServer>>, std::net::SocketAddr) {
        let mut config = RealmConfig::default();
        config.network.port = 0;

        let server = Arc::new(build_server(&config).unwrap());
        let addr = server.listen().await.unwrap();

        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.run().await });
        (server, addr)
    }

    async fn read_hello(client: &mut TcpStream) -> String {
        // "HC" + 32 字节密钥 + "\n\0"
        let mut frame = vec![0u8; 2 + key::KEY_LEN + 2];
        timeout(WAIT, client.read_exact(&mut frame)).await.unwrap().unwrap();
        String::from_utf8(frame).unwrap()
    }

    #[tokio::test]
    async fn test_client_receives_hello_with_key() {
        let (server, addr) = start().await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();

        let expected = format!("HC{}\n\0", server.handler().key());
        assert_eq!(read_hello(&mut first).await, expected);
        assert_eq!(read_hello(&mut second).await, expected);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_wrong_version_is_disconnected() {
        let (server, addr) = start().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        read_hello(&mut client).await;

        client.write_all(b"0.0.1\nplayer\nsecret\n\0\nAf\n").await.unwrap();

        let mut rest = Vec::new();
        timeout(WAIT, client.read_to_end(&mut rest)).await.unwrap().unwrap();
        assert!(rest.is_empty());

        server.stop().await;
    }

    #[tokio::test]
    async fn test_matching_version_stays_connected() {
        let (server, addr) = start().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        read_hello(&mut client).await;

        client.write_all(b"1.12.0S\nplayer\nsecret\n\0\nAf\n").await.unwrap();

        let mut buf = [0u8; 1];
        let read = timeout(Duration::from_millis(200), client.read(&mut buf)).await;
        assert!(read.is_err(), "connection should stay open");
        assert_eq!(server.sessions().len().await, 1);

        server.stop().await;
    }
}
