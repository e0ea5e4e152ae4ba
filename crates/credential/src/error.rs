use bblearning_core::StoreError;
use bblearning_crypto::CryptoError;

/// 凭证服务错误
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("请求参数无效: {0}")]
    InvalidRequest(String),

    #[error("密钥不存在: provider={provider}, key_name={key_name}")]
    SecretNotFound { provider: String, key_name: String },

    #[error("密钥不存在: id={0}")]
    SecretIdNotFound(i64),

    #[error("提供商没有可用密钥: {0}")]
    NoActiveSecret(String),

    #[error("密钥已停用: provider={provider}, key_name={key_name}")]
    SecretInactive { provider: String, key_name: String },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("序列化失败: {0}")]
    Serialization(String),

    #[error("后台任务失败: {0}")]
    TaskFailed(String),
}

pub type CredentialResult<T> = Result<T, CredentialError>;
