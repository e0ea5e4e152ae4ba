/// 加密错误
///
/// 错误信息只描述失败原因，不包含明文、密钥或派生密钥。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("主密钥无效: 需要 {expected} 字节，实际 {actual} 字节")]
    InvalidMasterKey { expected: usize, actual: usize },

    #[error("主密钥格式错误: {0}")]
    MalformedMasterKey(String),

    #[error("盐值长度无效: 需要 {expected} 字节，实际 {actual} 字节")]
    InvalidSalt { expected: usize, actual: usize },

    #[error("密文格式无效: {0}")]
    InvalidCiphertext(String),

    #[error("加密失败")]
    EncryptionFailed,

    /// 认证失败（主密钥、盐值、nonce 不匹配或密文被篡改）
    #[error("解密失败")]
    DecryptionFailed,

    #[error("随机数生成失败: {0}")]
    RandomUnavailable(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
