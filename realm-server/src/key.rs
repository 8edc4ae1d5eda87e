//! 认证密钥

use rand::Rng;

/// 密钥长度
pub const KEY_LEN: usize = 32;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// 生成 32 个随机小写字母组成的密钥
pub fn generate_key() -> String {
    let mut rng = rand::thread_rng();
    (0..KEY_LEN)
        .map(|_| char::from(LETTERS[rng.gen_range(0..LETTERS.len())]))
        .collect()
}
