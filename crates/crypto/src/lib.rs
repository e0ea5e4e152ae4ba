//! 密钥加密 crate
//!
//! 提供认证加密（AEAD）、基于盐值的密钥派生和主密钥生成工具。

mod encryptor;
mod error;

pub use encryptor::{
    clear_bytes, clear_string, generate_master_key, generate_master_key_hex, ChaChaEncryptor,
    EncryptedPayload, Encryptor, KEY_SIZE, NONCE_SIZE, PBKDF2_ITERATIONS, SALT_SIZE,
};
pub use error::{CryptoError, CryptoResult};

// 调用方持有明文时使用的清零包装
pub use zeroize::Zeroizing;
