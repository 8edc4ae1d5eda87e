//! 帧编解码
//!
//! 帧格式:
//! ```text
//! 出站: <serialize(message)> '\n' '\0'
//! 入站: <code><body> '\n' <code><body> '\n' ...
//! 握手: <version>'\n'<username>'\n'<password>... "\nAf\n"
//! ```
//!
//! 入站代码按最长前缀匹配（3 → 2 → 1 个字符），单个首字符总是可用的回退代码。

use std::iter;
use std::sync::Arc;

use tracing::trace;

use crate::constants::{
    FRAME_DELIMITER, FRAME_PADDING, FRAME_TERMINATOR, HANDSHAKE_CODE, HANDSHAKE_SENTINEL,
    HANDSHAKE_STRIP_LEN, MAX_CODE_LEN,
};
use crate::error::{ProtocolError, Result};
use crate::message::Message;
use crate::registry::MessageRegistry;

/// 文本帧编解码器
#[derive(Clone)]
pub struct FrameCodec {
    registry: Arc<MessageRegistry>,
    handshake_code: &'static str,
}

impl FrameCodec {
    /// 创建编解码器，握手帧使用默认的身份识别代码
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        Self {
            registry,
            handshake_code: HANDSHAKE_CODE,
        }
    }

    /// 指定握手帧使用的消息代码
    pub fn with_handshake_code(mut self, code: &'static str) -> Self {
        self.handshake_code = code;
        self
    }

    pub fn registry(&self) -> &MessageRegistry {
        &self.registry
    }

    /// 将一段缓冲区解码为有序的消息序列
    ///
    /// 未登记的代码会被静默跳过；消息体反序列化失败时返回错误。
    pub fn decode(&self, buffer: &[u8]) -> Result<Vec<Box<dyn Message>>> {
        if buffer.is_empty() {
            return Ok(Vec::new());
        }

        let text = String::from_utf8_lossy(buffer);

        // 客户端的第一帧没有代码前缀，整段缓冲区视为一条身份识别消息
        if text.ends_with(HANDSHAKE_SENTINEL) {
            if let Some(mut message) = self.registry.resolve(self.handshake_code) {
                message.deserialize(strip_chars_from_end(&text, HANDSHAKE_STRIP_LEN))?;
                return Ok(vec![message]);
            }
        }

        let mut messages = Vec::new();
        for token in text.split(char::from(FRAME_DELIMITER)) {
            // 出站格式的帧以 "\n\0" 结尾，分隔符后的 NUL 只是填充
            let token = token.trim_start_matches(FRAME_PADDING);
            if token.is_empty() {
                continue;
            }

            let code = self.resolve_code(token);
            let Some(mut message) = self.registry.resolve(code) else {
                trace!(code, "Skipping token with unregistered code");
                continue;
            };

            message.deserialize(&token[code.len()..])?;
            messages.push(message);
        }

        Ok(messages)
    }

    /// 编码一条消息
    pub fn encode(&self, message: &dyn Message) -> Vec<u8> {
        let mut frame = message.serialize().into_bytes();
        frame.extend_from_slice(FRAME_TERMINATOR);
        frame
    }

    /// 最长前缀匹配
    fn resolve_code<'t>(&self, token: &'t str) -> &'t str {
        for len in (2..=MAX_CODE_LEN).rev() {
            if let Some(prefix) = char_prefix(token, len) {
                if self.registry.contains(prefix) {
                    return prefix;
                }
            }
        }

        char_prefix(token, 1).unwrap_or(token)
    }
}

/// 取前 `count` 个字符，不足时返回 None
fn char_prefix(token: &str, count: usize) -> Option<&str> {
    let end = token
        .char_indices()
        .map(|(idx, _)| idx)
        .chain(iter::once(token.len()))
        .nth(count)?;
    Some(&token[..end])
}

/// 去掉结尾的 `count` 个字符，不足时返回空串
fn strip_chars_from_end(text: &str, count: usize) -> &str {
    if count == 0 {
        return text;
    }

    text.char_indices()
        .rev()
        .nth(count - 1)
        .map(|(idx, _)| &text[..idx])
        .unwrap_or("")
}

// ============================================================================
// 读取缓冲
// ============================================================================

/// 跨读取累积未完成的帧
///
/// 只有最后一个分隔符之前的数据会交给解码器，之后的残余保留到下一次读取。
/// 紧跟在分隔符之后的 NUL 是帧填充，不计入残余。
#[derive(Debug)]
pub struct FrameBuffer {
    pending: Vec<u8>,
    max_size: usize,
}

impl FrameBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            pending: Vec::with_capacity(max_size.min(crate::READ_CHUNK_SIZE)),
            max_size,
        }
    }

    /// 追加读到的数据，残余帧超过上限时返回错误
    pub fn extend(&mut self, chunk: &[u8]) -> Result<()> {
        // 缓冲区为空说明处在帧边界上
        let chunk = if self.pending.is_empty() {
            skip_padding(chunk)
        } else {
            chunk
        };
        self.pending.extend_from_slice(chunk);

        let tail = match self.pending.iter().rposition(|b| *b == FRAME_DELIMITER) {
            Some(idx) => self.pending.len() - idx - 1,
            None => self.pending.len(),
        };
        if tail > self.max_size {
            return Err(ProtocolError::FrameTooLarge {
                size: tail,
                max: self.max_size,
            });
        }
        Ok(())
    }

    /// 取出所有完整的帧（含最后一个分隔符）
    pub fn take_complete(&mut self) -> Option<Vec<u8>> {
        let idx = self.pending.iter().rposition(|b| *b == FRAME_DELIMITER)?;
        let rest = skip_padding(&self.pending[idx + 1..]).to_vec();
        self.pending.truncate(idx + 1);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    /// 未解码的残余字节数
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn skip_padding(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| *b != FRAME_PADDING as u8)
        .unwrap_or(bytes.len());
    &bytes[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::tests::{
        text_message, AccountMessage, AnyAMessage, BasicMessage, ChannelMessage,
    };
    use crate::message::{downcast_message, MessageDescriptor, MessageType};

    text_message!(HandshakeMessage, "HA");

    /// 反序列化总是失败的消息
    #[derive(Debug, Default)]
    struct BrokenMessage;

    impl Message for BrokenMessage {
        fn code(&self) -> &'static str {
            Self::CODE
        }

        fn serialize(&self) -> String {
            String::new()
        }

        fn deserialize(&mut self, body: &str) -> Result<()> {
            Err(ProtocolError::malformed(Self::CODE, format!("unexpected body {body:?}")))
        }
    }

    impl MessageType for BrokenMessage {
        const CODE: &'static str = "X";
    }

    fn codec_with(descriptors: Vec<MessageDescriptor>) -> FrameCodec {
        let mut registry = MessageRegistry::new();
        registry.register(descriptors).unwrap();
        FrameCodec::new(Arc::new(registry))
    }

    fn default_codec() -> FrameCodec {
        codec_with(vec![
            MessageDescriptor::of::<AccountMessage>(),
            MessageDescriptor::of::<BasicMessage>(),
            MessageDescriptor::of::<ChannelMessage>(),
            MessageDescriptor::of::<AnyAMessage>(),
            MessageDescriptor::of::<HandshakeMessage>(),
            MessageDescriptor::of::<BrokenMessage>(),
        ])
    }

    #[test]
    fn test_decode_empty_buffer() {
        let codec = default_codec();
        assert!(codec.decode(b"").unwrap().is_empty());
    }

    #[test]
    fn test_decode_two_frames_in_order() {
        let codec = default_codec();
        let messages = codec.decode(b"AAfirst\nBAsecond").unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].code(), "AA");
        assert_eq!(messages[1].code(), "BA");

        let mut iter = messages.into_iter();
        let first = downcast_message::<AccountMessage>(iter.next().unwrap()).unwrap();
        let second = downcast_message::<BasicMessage>(iter.next().unwrap()).unwrap();
        assert_eq!(first.body, "first");
        assert_eq!(second.body, "second");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let codec = default_codec();
        let messages = codec.decode(b"cC+hello\nAAx\nABy\n").unwrap();

        let codes: Vec<_> = messages.iter().map(|m| m.code()).collect();
        assert_eq!(codes, vec!["cC+", "AA", "A"]);

        // 'AB' 未登记，回退到单字符 'A'，消息体保留第二个字符
        let fallback = downcast_message::<AnyAMessage>(messages.into_iter().nth(2).unwrap()).unwrap();
        assert_eq!(fallback.body, "By");
    }

    #[test]
    fn test_unregistered_code_is_skipped() {
        let codec = default_codec();
        // 'cCz' 既不匹配 'cC+' 也没有登记 'c'
        let messages = codec.decode(b"cCz\nZZtop\n\nBAok\n").unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].code(), "BA");
    }

    #[test]
    fn test_short_token_does_not_panic() {
        let codec = default_codec();
        let messages = codec.decode(b"A\nc\n").unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].code(), "A");
    }

    #[test]
    fn test_handshake_buffer_yields_single_message() {
        let codec = default_codec();
        let buffer = "AAignored\n1.12.0s\nuser\npass\n\0\nAf\n";
        let messages = codec.decode(buffer.as_bytes()).unwrap();

        assert_eq!(messages.len(), 1);
        let handshake =
            downcast_message::<HandshakeMessage>(messages.into_iter().next().unwrap()).unwrap();
        assert_eq!(handshake.body, "AAignored\n1.12.0s\nuser\npass");
    }

    #[test]
    fn test_handshake_without_registered_code_falls_through() {
        let codec = codec_with(vec![
            MessageDescriptor::of::<AccountMessage>(),
            MessageDescriptor::of::<AnyAMessage>(),
        ]);
        let messages = codec.decode(b"AAx\nAf\n").unwrap();

        let codes: Vec<_> = messages.iter().map(|m| m.code()).collect();
        assert_eq!(codes, vec!["AA", "A"]);
    }

    #[test]
    fn test_custom_handshake_code() {
        let codec = default_codec().with_handshake_code("BA");
        let messages = codec.decode(b"v1\nuser\npass\n\0\nAf\n").unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].code(), "BA");
    }

    #[test]
    fn test_malformed_body_is_an_error() {
        let codec = default_codec();
        let err = codec.decode(b"AAok\nXbad\n").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let codec = default_codec();
        let messages = codec.decode(b"AA\xff\xfe\n").unwrap();

        let message = downcast_message::<AccountMessage>(messages.into_iter().next().unwrap()).unwrap();
        assert_eq!(message.body, "\u{fffd}\u{fffd}");
    }

    #[test]
    fn test_encode_appends_terminator() {
        let codec = default_codec();
        let message = AccountMessage {
            body: "key".to_string(),
        };
        assert_eq!(codec.encode(&message), b"AAkey\n\0".to_vec());
    }

    #[test]
    fn test_encode_then_decode_preserves_body() {
        let codec = default_codec();
        let original = ChannelMessage {
            body: "général".to_string(),
        };

        let frame = codec.encode(&original);
        let decoded = codec.decode(&frame).unwrap();

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].serialize(), original.serialize());
    }

    #[test]
    fn test_frame_buffer_keeps_partial_tail() {
        let mut buffer = FrameBuffer::new(64);
        buffer.extend(b"AAone\nBAtw").unwrap();

        assert_eq!(buffer.take_complete().unwrap(), b"AAone\n".to_vec());
        assert_eq!(buffer.remaining(), 4);
        assert!(buffer.take_complete().is_none());

        buffer.extend(b"o\n").unwrap();
        assert_eq!(buffer.take_complete().unwrap(), b"BAtwo\n".to_vec());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_padding_after_delimiter_is_not_remainder() {
        let mut buffer = FrameBuffer::new(64);

        buffer.extend(b"AAone\n\0").unwrap();
        assert_eq!(buffer.take_complete().unwrap(), b"AAone\n".to_vec());
        assert!(buffer.is_empty());

        // NUL 落在下一次读取的开头
        buffer.extend(b"\0AAtwo\n").unwrap();
        assert_eq!(buffer.take_complete().unwrap(), b"AAtwo\n".to_vec());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_padded_tokens_decode() {
        let codec = default_codec();
        let messages = codec.decode(b"AAone\n\0AAtwo\n\0").unwrap();

        let bodies: Vec<_> = messages
            .into_iter()
            .map(|m| downcast_message::<AccountMessage>(m).unwrap().body)
            .collect();
        assert_eq!(bodies, vec!["one", "two"]);
    }

    #[test]
    fn test_frame_buffer_rejects_oversized_tail() {
        let mut buffer = FrameBuffer::new(4);
        buffer.extend(b"AA\n").unwrap();

        let err = buffer.extend(b"BAlong").unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { size: 6, max: 4 }));
    }
}
