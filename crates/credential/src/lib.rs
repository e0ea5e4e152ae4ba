//! 密钥保险库 crate
//!
//! 加密存储外部 AI/OCR 服务的 API 密钥，提供解密缓存、使用计数与审计日志。
//!
//! ## 模块结构
//!
//! - `service` - 凭证服务与 `SecretSource` 接口
//! - `dao` - 密钥表与审计日志表的数据访问
//! - `cache` - 解密结果 TTL 缓存
//! - `usage` - 异步使用计数队列
//! - `config` - 服务配置

mod cache;
mod config;
pub mod dao;
mod error;
mod service;
mod types;
mod usage;

pub use cache::DecryptCache;
pub use config::CredentialConfig;
pub use error::{CredentialError, CredentialResult};
pub use service::{CredentialService, SecretSource, DEFAULT_AUDIT_LIMIT, MAX_AUDIT_LIMIT};
pub use types::{
    cache_key, is_valid_provider, AuditAction, AuditContext, CreateSecretRequest,
    EncryptedFields, NewAuditEntry, NewSecret, SecretAuditEntry, SecretDto, SecretFilter,
    SecretRecord, MAX_DESCRIPTION_LEN, MAX_KEY_NAME_LEN, MAX_PRIORITY, MAX_PROVIDER_LEN,
    MIN_SECRET_LEN,
};
pub use usage::UsageRecorder;
