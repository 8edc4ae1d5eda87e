//! 协议常量定义

use std::time::Duration;

/// 握手帧结尾标记
pub const HANDSHAKE_SENTINEL: &str = "\nAf\n";

/// 握手帧需要从结尾剥离的字符数
pub const HANDSHAKE_STRIP_LEN: usize = 6;

/// 默认的身份识别消息代码
pub const HANDSHAKE_CODE: &str = "HA";

/// 入站帧分隔符
pub const FRAME_DELIMITER: u8 = b'\n';

/// 帧分隔符之后的填充字符
pub const FRAME_PADDING: char = '\0';

/// 出站帧结尾（换行 + NUL）
pub const FRAME_TERMINATOR: &[u8] = b"\n\0";

/// 协议代码最大长度
pub const MAX_CODE_LEN: usize = 3;

/// 未解码数据的最大缓存大小
pub const MAX_FRAME_SIZE: usize = 8192;

/// 单次读取的块大小
pub const READ_CHUNK_SIZE: usize = 4096;

/// 默认监听端口
pub const DEFAULT_PORT: u16 = 5555;

/// 停止服务时等待连接全部关闭的最长时间
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
