//! 密钥与审计日志类型定义

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{CredentialError, CredentialResult};

/// 提供商标识最大长度
pub const MAX_PROVIDER_LEN: usize = 50;
/// 密钥名称最大长度
pub const MAX_KEY_NAME_LEN: usize = 100;
/// 明文密钥最小长度
pub const MIN_SECRET_LEN: usize = 10;
/// 描述最大长度
pub const MAX_DESCRIPTION_LEN: usize = 500;
/// 优先级上限
pub const MAX_PRIORITY: i32 = 100;

/// 加密存储的密钥记录
///
/// `ciphertext`、`salt`、`nonce` 总是一起写入，不会单独修改。
#[derive(Clone)]
pub struct SecretRecord {
    pub id: i64,
    pub provider: String,
    pub key_name: String,
    /// base64 编码的密文
    pub ciphertext: String,
    /// hex 编码的盐值
    pub salt: String,
    /// hex 编码的 nonce
    pub nonce: String,
    pub is_active: bool,
    pub priority: i32,
    pub description: String,
    /// 额外元数据 (JSON)
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: i64,
}

impl SecretRecord {
    /// 转换为不含密钥材料的 DTO
    pub fn to_dto(&self) -> SecretDto {
        SecretDto {
            id: self.id,
            provider: self.provider.clone(),
            key_name: self.key_name.clone(),
            is_active: self.is_active,
            priority: self.priority,
            description: self.description.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_used_at: self.last_used_at,
            usage_count: self.usage_count,
        }
    }

    pub fn cache_key(&self) -> String {
        cache_key(&self.provider, &self.key_name)
    }
}

impl fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRecord")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("key_name", &self.key_name)
            .field("ciphertext", &"[REDACTED]")
            .field("is_active", &self.is_active)
            .field("priority", &self.priority)
            .field("usage_count", &self.usage_count)
            .finish_non_exhaustive()
    }
}

/// 对外返回的密钥信息（不含密文、盐值、nonce）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretDto {
    pub id: i64,
    pub provider: String,
    pub key_name: String,
    pub is_active: bool,
    pub priority: i32,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: i64,
}

/// 缓存键 `provider:key_name`
pub fn cache_key(provider: &str, key_name: &str) -> String {
    format!("{}:{}", provider, key_name)
}

/// 一组同时写入的加密字段
#[derive(Clone)]
pub struct EncryptedFields {
    pub ciphertext: String,
    pub salt: String,
    pub nonce: String,
}

/// 新建密钥参数
#[derive(Clone)]
pub struct NewSecret {
    pub provider: String,
    pub key_name: String,
    pub encrypted: EncryptedFields,
    pub priority: i32,
    pub description: String,
    pub metadata: Option<String>,
    pub operator_id: Option<i64>,
}

/// 创建/轮换密钥请求
pub struct CreateSecretRequest {
    pub provider: String,
    pub key_name: String,
    pub secret: Zeroizing<String>,
    pub description: String,
    pub priority: i32,
    pub metadata: Option<serde_json::Value>,
}

impl CreateSecretRequest {
    pub fn new(
        provider: impl Into<String>,
        key_name: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            key_name: key_name.into(),
            secret: Zeroizing::new(secret.into()),
            description: String::new(),
            priority: 0,
            metadata: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// 校验请求字段
    pub fn validate(&self) -> CredentialResult<()> {
        if !is_valid_provider(&self.provider) {
            return Err(CredentialError::InvalidRequest(format!(
                "provider 必须是 1-{} 个小写字母、数字、'-' 或 '_'",
                MAX_PROVIDER_LEN
            )));
        }
        let key_name_len = self.key_name.chars().count();
        if key_name_len == 0 || key_name_len > MAX_KEY_NAME_LEN {
            return Err(CredentialError::InvalidRequest(format!(
                "key_name 长度必须在 1-{} 之间",
                MAX_KEY_NAME_LEN
            )));
        }
        if self.secret.chars().count() < MIN_SECRET_LEN {
            return Err(CredentialError::InvalidRequest(format!(
                "密钥长度至少 {} 个字符",
                MIN_SECRET_LEN
            )));
        }
        if self.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(CredentialError::InvalidRequest(format!(
                "description 不能超过 {} 个字符",
                MAX_DESCRIPTION_LEN
            )));
        }
        if !(0..=MAX_PRIORITY).contains(&self.priority) {
            return Err(CredentialError::InvalidRequest(format!(
                "priority 必须在 0-{} 之间",
                MAX_PRIORITY
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for CreateSecretRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateSecretRequest")
            .field("provider", &self.provider)
            .field("key_name", &self.key_name)
            .field("secret", &"[REDACTED]")
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

pub fn is_valid_provider(provider: &str) -> bool {
    !provider.is_empty()
        && provider.len() <= MAX_PROVIDER_LEN
        && provider
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// 列表过滤条件
#[derive(Debug, Clone)]
pub struct SecretFilter {
    pub provider: Option<String>,
    pub include_inactive: bool,
}

impl Default for SecretFilter {
    fn default() -> Self {
        Self {
            provider: None,
            include_inactive: true,
        }
    }
}

impl SecretFilter {
    pub fn provider(provider: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            include_inactive: true,
        }
    }

    pub fn active_only(mut self) -> Self {
        self.include_inactive = false;
        self
    }
}

/// 审计操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Activate,
    Deactivate,
    /// 使用密钥
    Use,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Activate => "activate",
            AuditAction::Deactivate => "deactivate",
            AuditAction::Use => "use",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(AuditAction::Create),
            "update" => Some(AuditAction::Update),
            "delete" => Some(AuditAction::Delete),
            "activate" => Some(AuditAction::Activate),
            "deactivate" => Some(AuditAction::Deactivate),
            "use" => Some(AuditAction::Use),
            _ => None,
        }
    }
}

/// 发起特权操作的请求上下文
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditContext {
    pub operator_id: Option<i64>,
    pub operator_ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
}

impl AuditContext {
    pub fn operator(operator_id: i64) -> Self {
        Self {
            operator_id: Some(operator_id),
            ..Default::default()
        }
    }

    /// 系统发起的操作（无操作者）
    pub fn system() -> Self {
        Self::default()
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.operator_ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// 审计日志记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretAuditEntry {
    pub id: i64,
    pub secret_id: Option<i64>,
    pub action: AuditAction,
    pub operator_id: Option<i64>,
    pub operator_ip: Option<String>,
    /// 脱敏后的旧值 (SecretDto JSON)
    pub old_value: Option<String>,
    /// 脱敏后的新值 (SecretDto JSON)
    pub new_value: Option<String>,
    pub created_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
}

/// 新建审计日志参数
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub secret_id: Option<i64>,
    pub action: AuditAction,
    pub context: AuditContext,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewAuditEntry {
    /// 由前后两个快照构造审计日志，快照只序列化 DTO
    pub fn from_snapshots(
        secret_id: i64,
        action: AuditAction,
        context: &AuditContext,
        old: Option<&SecretDto>,
        new: Option<&SecretDto>,
        created_at: DateTime<Utc>,
    ) -> CredentialResult<Self> {
        let encode = |dto: Option<&SecretDto>| -> CredentialResult<Option<String>> {
            dto.map(|d| {
                serde_json::to_string(d)
                    .map_err(|e| CredentialError::Serialization(e.to_string()))
            })
            .transpose()
        };

        Ok(Self {
            secret_id: Some(secret_id),
            action,
            context: context.clone(),
            old_value: encode(old)?,
            new_value: encode(new)?,
            created_at,
        })
    }

    /// 使用记录
    pub fn usage(secret_id: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            secret_id: Some(secret_id),
            action: AuditAction::Use,
            context: AuditContext::system(),
            old_value: None,
            new_value: None,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_validation() {
        assert!(is_valid_provider("deepseek"));
        assert!(is_valid_provider("baidu-ocr"));
        assert!(is_valid_provider("open_ai2"));
        assert!(!is_valid_provider(""));
        assert!(!is_valid_provider("OpenAI"));
        assert!(!is_valid_provider("has space"));
        assert!(!is_valid_provider(&"a".repeat(51)));
    }

    #[test]
    fn test_request_validation() {
        let ok = CreateSecretRequest::new("openai", "default", "sk-1234567890")
            .with_priority(50)
            .with_description("主账号");
        assert!(ok.validate().is_ok());

        let short = CreateSecretRequest::new("openai", "default", "sk-1");
        assert!(matches!(
            short.validate(),
            Err(CredentialError::InvalidRequest(_))
        ));

        let bad_priority =
            CreateSecretRequest::new("openai", "default", "sk-1234567890").with_priority(101);
        assert!(bad_priority.validate().is_err());

        let empty_name = CreateSecretRequest::new("openai", "", "sk-1234567890");
        assert!(empty_name.validate().is_err());
    }

    #[test]
    fn test_request_debug_redacts_secret() {
        let req = CreateSecretRequest::new("openai", "default", "sk-super-secret-value");
        let debug = format!("{:?}", req);
        assert!(!debug.contains("sk-super-secret-value"));
    }

    #[test]
    fn test_audit_action_roundtrip() {
        for action in [
            AuditAction::Create,
            AuditAction::Update,
            AuditAction::Delete,
            AuditAction::Activate,
            AuditAction::Deactivate,
            AuditAction::Use,
        ] {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(AuditAction::parse("rotate"), None);
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key("openai", "default"), "openai:default");
    }
}
