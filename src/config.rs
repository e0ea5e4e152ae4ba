//! 引擎配置
//!
//! 配置文件为 YAML（默认 `vault.yaml`），主密钥只从环境变量
//! `ENCRYPTION_MASTER_KEY` 读取，不写入配置文件。

use std::path::Path;

use bblearning_core::DatabaseConfig;
use bblearning_credential::CredentialConfig;
use bblearning_crypto::ChaChaEncryptor;
use bblearning_quota::QuotaConfig;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// 主密钥环境变量名
pub const MASTER_KEY_ENV: &str = "ENCRYPTION_MASTER_KEY";

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "vault.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("读取配置文件失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("解析配置文件失败: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{MASTER_KEY_ENV} 环境变量未设置")]
    MissingMasterKey,

    #[error("主密钥无效: {0}")]
    InvalidMasterKey(String),

    #[error("无效的时区: {0}")]
    InvalidTimezone(String),
}

/// 顶层配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub credential: CredentialConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
}

impl VaultConfig {
    /// 从文件加载配置
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// 文件不存在时使用默认配置
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("[Config] 配置文件 {} 不存在，使用默认配置", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.timezone()?;
        Ok(config)
    }

    /// 解析配额重置使用的时区
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.quota
            .timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.quota.timezone.clone()))
    }
}

/// 从环境变量读取主密钥并创建加密器
pub fn encryptor_from_env() -> Result<ChaChaEncryptor, ConfigError> {
    encryptor_from_hex(std::env::var(MASTER_KEY_ENV).ok().as_deref())
}

/// 从 hex 主密钥创建加密器；缺失或为空视为未设置
pub fn encryptor_from_hex(master_key_hex: Option<&str>) -> Result<ChaChaEncryptor, ConfigError> {
    let hex = master_key_hex
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ConfigError::MissingMasterKey)?;
    ChaChaEncryptor::from_hex(hex).map_err(|e| ConfigError::InvalidMasterKey(e.to_string()))
}
