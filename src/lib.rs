//! 凭证保险库与 AI 配额引擎
//!
//! 把数据库、加密器、凭证服务和配额服务按配置组装在一起，
//! 由调用方显式持有，不使用全局状态。
//!
//! ## 模块结构
//!
//! - `config` - YAML 配置与主密钥加载

pub mod config;

use std::sync::Arc;

use bblearning_core::{Database, StoreError};
use bblearning_credential::CredentialService;
use bblearning_crypto::Encryptor;
use bblearning_quota::{
    QuotaError, QuotaScheduler, QuotaService, ScheduleConfig, SchedulerHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use config::{encryptor_from_env, ConfigError, VaultConfig, DEFAULT_CONFIG_PATH};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Quota(#[from] QuotaError),
}

/// 已组装的引擎
pub struct VaultEngine {
    db: Database,
    credentials: CredentialService,
    quota: QuotaService,
    schedule: ScheduleConfig,
}

impl VaultEngine {
    /// 打开数据库并创建各服务，需在 tokio 运行时内调用
    pub fn from_config(
        config: &VaultConfig,
        encryptor: Arc<dyn Encryptor>,
    ) -> Result<Self, EngineError> {
        let tz = config.timezone()?;
        let db = Database::open(&config.database)?;
        let credentials =
            CredentialService::new(db.clone(), encryptor, config.credential.clone());
        let quota = QuotaService::new(db.clone(), config.quota.account_defaults(), tz);

        info!(
            "[VaultEngine] 已初始化，数据库 {}，时区 {}",
            db.path().display(),
            tz
        );

        Ok(Self {
            db,
            credentials,
            quota,
            schedule: config.quota.schedule.clone(),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn credentials(&self) -> &CredentialService {
        &self.credentials
    }

    pub fn quota(&self) -> &QuotaService {
        &self.quota
    }

    /// 启动配额定时任务；配置中关闭时返回 `None`
    pub fn start_scheduler(
        &self,
        shutdown: CancellationToken,
    ) -> Result<Option<SchedulerHandle>, EngineError> {
        if !self.schedule.enabled {
            info!("[VaultEngine] 定时任务已关闭");
            return Ok(None);
        }
        let scheduler = QuotaScheduler::new(self.quota.clone(), &self.schedule)?;
        Ok(Some(scheduler.start(shutdown)))
    }

    /// 停止后台任务并等待使用计数队列写完
    pub async fn shutdown(self, scheduler: Option<SchedulerHandle>) {
        if let Some(handle) = scheduler {
            handle.shutdown().await;
        }
        self.credentials.shutdown().await;
        info!("[VaultEngine] 已停止");
    }
}

/// 脱敏显示明文：保留前 8 位和后 4 位，较短时只保留前 4 位
pub fn mask_secret(plaintext: &str) -> String {
    let chars: Vec<char> = plaintext.chars().collect();
    if chars.len() > 12 {
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        let head: String = chars.iter().take(4).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bblearning_credential::{AuditContext, CreateSecretRequest};
    use bblearning_crypto::ChaChaEncryptor;
    use bblearning_quota::{RequestMeta, ServiceType};

    fn engine(dir: &tempfile::TempDir, schedule_enabled: bool) -> VaultEngine {
        let mut config = VaultConfig::default();
        config.database.path = dir.path().join("vault.db");
        config.quota.schedule.enabled = schedule_enabled;
        let encryptor = ChaChaEncryptor::with_iterations(&[7u8; 32], 1_000).unwrap();
        VaultEngine::from_config(&config, Arc::new(encryptor)).unwrap()
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("sk-abcdefghijklmnop"), "sk-abcde...mnop");
        assert_eq!(mask_secret("sk-1234567"), "sk-1...");
        assert_eq!(mask_secret("密钥密钥密钥密钥密钥密钥密钥"), "密钥密钥密钥密钥...密钥密钥");
    }

    #[tokio::test]
    async fn test_engine_wires_services() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir, false);

        engine
            .credentials()
            .create(
                CreateSecretRequest::new("deepseek", "default", "sk-test-0123456789"),
                AuditContext::operator(1),
            )
            .await
            .unwrap();
        let plaintext = engine
            .credentials()
            .get_decrypted("deepseek", "default")
            .await
            .unwrap();
        assert_eq!(plaintext.as_str(), "sk-test-0123456789");

        let receipt = engine
            .quota()
            .check_and_consume(42, 3, ServiceType::Chat, RequestMeta::generated())
            .await
            .unwrap();
        // 永久配额为 0，先从月配额扣减
        assert_eq!(receipt.value.info.monthly_remaining, 297);
        assert_eq!(receipt.value.info.daily_remaining, 10);

        engine.shutdown(None).await;
    }

    #[tokio::test]
    async fn test_scheduler_respects_enabled_flag() {
        let dir = tempfile::tempdir().unwrap();
        let disabled = engine(&dir, false);
        assert!(disabled
            .start_scheduler(CancellationToken::new())
            .unwrap()
            .is_none());
        disabled.shutdown(None).await;

        let dir = tempfile::tempdir().unwrap();
        let enabled = engine(&dir, true);
        let handle = enabled.start_scheduler(CancellationToken::new()).unwrap();
        assert!(handle.is_some());
        enabled.shutdown(handle).await;
    }

    #[tokio::test]
    async fn test_invalid_schedule_surfaces_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = VaultConfig::default();
        config.database.path = dir.path().join("vault.db");
        config.quota.schedule.daily_reset = "not a cron".to_string();
        let encryptor = ChaChaEncryptor::with_iterations(&[7u8; 32], 1_000).unwrap();
        let engine = VaultEngine::from_config(&config, Arc::new(encryptor)).unwrap();

        let result = engine.start_scheduler(CancellationToken::new());
        assert!(matches!(
            result,
            Err(EngineError::Quota(QuotaError::InvalidSchedule(_)))
        ));
        engine.shutdown(None).await;
    }
}
