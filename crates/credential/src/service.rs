//! 凭证服务
//!
//! 负责密钥的创建/轮换、解密读取、启停、删除与审计查询。
//!
//! ## 并发模型
//!
//! - 每个操作在阻塞线程池上打开独立连接
//! - 写操作使用 `BEGIN IMMEDIATE`，同一 (provider, key_name) 的并发创建被串行化
//! - 审计日志在保存点内写入，失败只产生告警，不回滚主操作
//! - 解密结果按 TTL 缓存，写操作提交后使对应条目失效

use std::sync::Arc;

use async_trait::async_trait;
use bblearning_core::{in_savepoint, Database, Page, PageRequest, StoreError, WithWarnings};
use bblearning_crypto::{CryptoError, Encryptor, Zeroizing};
use chrono::Utc;
use rusqlite::Transaction;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{start_cleanup_task, DecryptCache};
use crate::config::CredentialConfig;
use crate::dao::{SecretAuditDao, SecretDao};
use crate::error::{CredentialError, CredentialResult};
use crate::types::{
    cache_key, AuditAction, AuditContext, CreateSecretRequest, EncryptedFields, NewAuditEntry,
    NewSecret, SecretAuditEntry, SecretDto, SecretFilter,
};
use crate::usage::UsageRecorder;

/// 审计日志默认查询条数
pub const DEFAULT_AUDIT_LIMIT: u32 = 20;
/// 审计日志最大查询条数
pub const MAX_AUDIT_LIMIT: u32 = 100;

/// 明文密钥来源
///
/// 需要调用外部 AI/OCR 服务的模块只依赖这个接口。
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn get_decrypted(
        &self,
        provider: &str,
        key_name: &str,
    ) -> CredentialResult<Zeroizing<String>>;

    /// 取提供商下优先级最高的启用密钥
    async fn get_decrypted_preferred(&self, provider: &str)
        -> CredentialResult<Zeroizing<String>>;
}

pub struct CredentialService {
    db: Database,
    encryptor: Arc<dyn Encryptor>,
    cache: Arc<DecryptCache>,
    usage: UsageRecorder,
    shutdown: CancellationToken,
    cleanup: JoinHandle<()>,
}

impl CredentialService {
    /// 创建服务并启动后台任务，需要在 tokio 运行时内调用
    pub fn new(db: Database, encryptor: Arc<dyn Encryptor>, config: CredentialConfig) -> Self {
        let cache = Arc::new(DecryptCache::new(config.cache_ttl()));
        let shutdown = CancellationToken::new();
        let cleanup = start_cleanup_task(
            cache.clone(),
            config.cache_cleanup_interval(),
            shutdown.clone(),
        );
        let usage = UsageRecorder::start(
            db.clone(),
            config.usage_queue_capacity,
            config.audit_usage,
        );

        info!(
            "[CredentialService] 已启动，缓存 TTL {}s，使用队列容量 {}",
            config.cache_ttl_secs, config.usage_queue_capacity
        );

        Self {
            db,
            encryptor,
            cache,
            usage,
            shutdown,
            cleanup,
        }
    }

    pub fn cache(&self) -> &DecryptCache {
        &self.cache
    }

    /// 创建或轮换密钥
    ///
    /// (provider, key_name) 已存在时替换密文，启用状态不变，审计动作为 `update`；
    /// 否则新建，审计动作为 `create`。
    pub async fn create(
        &self,
        request: CreateSecretRequest,
        ctx: AuditContext,
    ) -> CredentialResult<WithWarnings<SecretDto>> {
        request.validate()?;

        let db = self.db.clone();
        let encryptor = self.encryptor.clone();
        let (dto, action, warnings) =
            run_blocking(move || create_blocking(&db, encryptor.as_ref(), &request, &ctx))
                .await?;

        self.cache.invalidate(&cache_key(&dto.provider, &dto.key_name));
        info!(
            "[CredentialService] {} 密钥 id={} provider={} key_name={}",
            action.as_str(),
            dto.id,
            dto.provider,
            dto.key_name
        );
        Ok(WithWarnings::new(dto, warnings))
    }

    /// 解密指定密钥
    ///
    /// 缓存命中时不访问数据库；未命中时解密并异步记录一次使用。
    pub async fn get_decrypted(
        &self,
        provider: &str,
        key_name: &str,
    ) -> CredentialResult<Zeroizing<String>> {
        let key = cache_key(provider, key_name);
        if let Some(plaintext) = self.cache.get(&key) {
            debug!("[CredentialService] 缓存命中 {}", key);
            return Ok(plaintext);
        }

        let generation = self.cache.generation(&key);
        let db = self.db.clone();
        let encryptor = self.encryptor.clone();
        let provider_owned = provider.to_string();
        let key_name_owned = key_name.to_string();
        let (secret_id, plaintext) = run_blocking(move || {
            decrypt_blocking(&db, encryptor.as_ref(), &provider_owned, &key_name_owned)
        })
        .await
        .inspect_err(|e| {
            if matches!(e, CredentialError::Crypto(_)) {
                error!("[CredentialService] 解密失败 {}: {}", key, e);
            }
        })?;

        self.usage.record(secret_id);
        self.cache.insert_if_current(&key, generation, plaintext.clone());
        Ok(plaintext)
    }

    /// 解密提供商下优先级最高的启用密钥（优先级降序，创建时间升序）
    pub async fn get_decrypted_preferred(
        &self,
        provider: &str,
    ) -> CredentialResult<Zeroizing<String>> {
        let db = self.db.clone();
        let provider_owned = provider.to_string();
        let key_name = run_blocking(move || {
            let conn = db.connect()?;
            let candidates = SecretDao::list_active_by_provider(&conn, &provider_owned)?;
            candidates
                .into_iter()
                .next()
                .map(|s| s.key_name)
                .ok_or(CredentialError::NoActiveSecret(provider_owned))
        })
        .await?;

        debug!("[CredentialService] {} 选中密钥 {}", provider, key_name);
        self.get_decrypted(provider, &key_name).await
    }

    /// 按 ID 获取密钥信息
    pub async fn get_by_id(&self, id: i64) -> CredentialResult<SecretDto> {
        let db = self.db.clone();
        run_blocking(move || {
            let conn = db.connect()?;
            SecretDao::get(&conn, id)?
                .map(|s| s.to_dto())
                .ok_or(CredentialError::SecretIdNotFound(id))
        })
        .await
    }

    /// 分页列出密钥
    pub async fn list(
        &self,
        filter: SecretFilter,
        page: PageRequest,
    ) -> CredentialResult<Page<SecretDto>> {
        let db = self.db.clone();
        run_blocking(move || {
            let conn = db.connect()?;
            let provider = filter.provider.as_deref();
            let total = SecretDao::count(&conn, provider, filter.include_inactive)?;
            let items = SecretDao::list(
                &conn,
                provider,
                filter.include_inactive,
                page.limit(),
                page.offset(),
            )?
            .iter()
            .map(|s| s.to_dto())
            .collect();

            Ok(Page {
                items,
                total,
                page: page.page,
                page_size: page.page_size,
            })
        })
        .await
    }

    /// 启用或停用密钥
    pub async fn update_status(
        &self,
        id: i64,
        active: bool,
        ctx: AuditContext,
    ) -> CredentialResult<WithWarnings<SecretDto>> {
        let db = self.db.clone();
        let (dto, warnings) =
            run_blocking(move || update_status_blocking(&db, id, active, &ctx)).await?;

        self.cache.invalidate(&cache_key(&dto.provider, &dto.key_name));
        info!(
            "[CredentialService] 密钥 id={} 已{}",
            id,
            if active { "启用" } else { "停用" }
        );
        Ok(WithWarnings::new(dto, warnings))
    }

    /// 删除密钥，返回被删除的密钥信息
    pub async fn delete(
        &self,
        id: i64,
        ctx: AuditContext,
    ) -> CredentialResult<WithWarnings<SecretDto>> {
        let db = self.db.clone();
        let (dto, warnings) = run_blocking(move || delete_blocking(&db, id, &ctx)).await?;

        self.cache.invalidate(&cache_key(&dto.provider, &dto.key_name));
        info!(
            "[CredentialService] 已删除密钥 id={} provider={} key_name={}",
            dto.id, dto.provider, dto.key_name
        );
        Ok(WithWarnings::new(dto, warnings))
    }

    /// 查询审计日志（按时间倒序）
    ///
    /// `limit` 为 0 时使用默认值 20，超过 100 时截断为 100。
    pub async fn get_audit_logs(
        &self,
        secret_id: Option<i64>,
        limit: u32,
        offset: u32,
    ) -> CredentialResult<Vec<SecretAuditEntry>> {
        let limit = normalize_audit_limit(limit);
        let db = self.db.clone();
        run_blocking(move || {
            let conn = db.connect()?;
            Ok(SecretAuditDao::list(
                &conn,
                secret_id,
                limit as i64,
                offset as i64,
            )?)
        })
        .await
    }

    /// 停止后台任务，等待已入队的使用记录写完
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.cleanup.await {
            warn!("[CredentialService] 缓存清理任务异常退出: {}", e);
        }
        self.usage.shutdown().await;
        info!("[CredentialService] 已停止");
    }
}

#[async_trait]
impl SecretSource for CredentialService {
    async fn get_decrypted(
        &self,
        provider: &str,
        key_name: &str,
    ) -> CredentialResult<Zeroizing<String>> {
        CredentialService::get_decrypted(self, provider, key_name).await
    }

    async fn get_decrypted_preferred(
        &self,
        provider: &str,
    ) -> CredentialResult<Zeroizing<String>> {
        CredentialService::get_decrypted_preferred(self, provider).await
    }
}

fn normalize_audit_limit(limit: u32) -> u32 {
    match limit {
        0 => DEFAULT_AUDIT_LIMIT,
        l => l.min(MAX_AUDIT_LIMIT),
    }
}

async fn run_blocking<T, F>(f: F) -> CredentialResult<T>
where
    F: FnOnce() -> CredentialResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CredentialError::TaskFailed(e.to_string()))?
}

/// 在保存点内写审计日志，失败转为告警
fn audit_in_savepoint(
    tx: &mut Transaction<'_>,
    entry: CredentialResult<NewAuditEntry>,
    warnings: &mut Vec<String>,
) {
    let result = entry.and_then(|entry| {
        in_savepoint(tx, |conn| SecretAuditDao::append(conn, &entry)).map_err(CredentialError::from)
    });
    if let Err(e) = result {
        warn!("[CredentialService] 审计日志写入失败: {}", e);
        warnings.push(format!("审计日志写入失败: {}", e));
    }
}

fn create_blocking(
    db: &Database,
    encryptor: &dyn Encryptor,
    request: &CreateSecretRequest,
    ctx: &AuditContext,
) -> CredentialResult<(SecretDto, AuditAction, Vec<String>)> {
    // 密钥派生较慢，放在事务外
    let salt = encryptor.generate_salt()?;
    let payload = encryptor.encrypt(&request.secret, &salt)?;
    let encrypted = EncryptedFields {
        ciphertext: payload.ciphertext,
        salt: hex::encode(salt),
        nonce: payload.nonce,
    };
    let metadata = request
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| CredentialError::Serialization(e.to_string()))?;

    let now = Utc::now();
    let mut conn = db.connect()?;
    let mut tx = Database::begin_immediate(&mut conn)?;

    let existing = SecretDao::get_by_name(&tx, &request.provider, &request.key_name)?;
    let (id, action, old) = match existing {
        Some(existing) => {
            SecretDao::rotate(
                &tx,
                existing.id,
                &encrypted,
                &request.description,
                request.priority,
                metadata.as_deref(),
                ctx.operator_id,
                now,
            )?;
            (existing.id, AuditAction::Update, Some(existing.to_dto()))
        }
        None => {
            let secret = NewSecret {
                provider: request.provider.clone(),
                key_name: request.key_name.clone(),
                encrypted,
                priority: request.priority,
                description: request.description.clone(),
                metadata,
                operator_id: ctx.operator_id,
            };
            let id = SecretDao::insert(&tx, &secret, now)?;
            (id, AuditAction::Create, None)
        }
    };

    let dto = SecretDao::get(&tx, id)?
        .ok_or(CredentialError::SecretIdNotFound(id))?
        .to_dto();

    let mut warnings = Vec::new();
    let entry = NewAuditEntry::from_snapshots(id, action, ctx, old.as_ref(), Some(&dto), now);
    audit_in_savepoint(&mut tx, entry, &mut warnings);
    tx.commit().map_err(StoreError::from)?;

    Ok((dto, action, warnings))
}

fn decrypt_blocking(
    db: &Database,
    encryptor: &dyn Encryptor,
    provider: &str,
    key_name: &str,
) -> CredentialResult<(i64, Zeroizing<String>)> {
    let conn = db.connect()?;
    let record = SecretDao::get_by_name(&conn, provider, key_name)?.ok_or_else(|| {
        CredentialError::SecretNotFound {
            provider: provider.to_string(),
            key_name: key_name.to_string(),
        }
    })?;

    if !record.is_active {
        return Err(CredentialError::SecretInactive {
            provider: provider.to_string(),
            key_name: key_name.to_string(),
        });
    }

    let salt = hex::decode(&record.salt)
        .map_err(|e| CryptoError::InvalidCiphertext(format!("盐值不是合法的 hex: {}", e)))?;
    let plaintext = encryptor.decrypt(&record.ciphertext, &record.nonce, &salt)?;
    Ok((record.id, plaintext))
}

fn update_status_blocking(
    db: &Database,
    id: i64,
    active: bool,
    ctx: &AuditContext,
) -> CredentialResult<(SecretDto, Vec<String>)> {
    let now = Utc::now();
    let mut conn = db.connect()?;
    let mut tx = Database::begin_immediate(&mut conn)?;

    let old = SecretDao::get(&tx, id)?
        .ok_or(CredentialError::SecretIdNotFound(id))?
        .to_dto();
    SecretDao::update_status(&tx, id, active, ctx.operator_id, now)?;
    let dto = SecretDao::get(&tx, id)?
        .ok_or(CredentialError::SecretIdNotFound(id))?
        .to_dto();

    let action = if active {
        AuditAction::Activate
    } else {
        AuditAction::Deactivate
    };
    let mut warnings = Vec::new();
    let entry = NewAuditEntry::from_snapshots(id, action, ctx, Some(&old), Some(&dto), now);
    audit_in_savepoint(&mut tx, entry, &mut warnings);
    tx.commit().map_err(StoreError::from)?;

    Ok((dto, warnings))
}

fn delete_blocking(
    db: &Database,
    id: i64,
    ctx: &AuditContext,
) -> CredentialResult<(SecretDto, Vec<String>)> {
    let now = Utc::now();
    let mut conn = db.connect()?;
    let mut tx = Database::begin_immediate(&mut conn)?;

    let old = SecretDao::get(&tx, id)?
        .ok_or(CredentialError::SecretIdNotFound(id))?
        .to_dto();
    SecretDao::delete(&tx, id)?;

    let mut warnings = Vec::new();
    let entry = NewAuditEntry::from_snapshots(id, AuditAction::Delete, ctx, Some(&old), None, now);
    audit_in_savepoint(&mut tx, entry, &mut warnings);
    tx.commit().map_err(StoreError::from)?;

    Ok((old, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bblearning_core::DatabaseConfig;
    use bblearning_crypto::ChaChaEncryptor;

    const TEST_ITERATIONS: u32 = 1_000;

    struct Fixture {
        _dir: tempfile::TempDir,
        db: Database,
        service: CredentialService,
    }

    fn fixture() -> Fixture {
        fixture_with(CredentialConfig::default())
    }

    fn fixture_with(config: CredentialConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&DatabaseConfig {
            path: dir.path().join("vault.db"),
            ..Default::default()
        })
        .unwrap();
        let encryptor = ChaChaEncryptor::with_iterations(&[7u8; 32], TEST_ITERATIONS).unwrap();
        let service = CredentialService::new(db.clone(), Arc::new(encryptor), config);
        Fixture {
            _dir: dir,
            db,
            service,
        }
    }

    fn admin() -> AuditContext {
        AuditContext::operator(1)
            .with_ip("127.0.0.1")
            .with_request_id("req-test")
    }

    #[tokio::test]
    async fn test_create_and_decrypt() {
        let f = fixture();
        let created = f
            .service
            .create(
                CreateSecretRequest::new("openai", "default", "sk-test-1234567890")
                    .with_priority(10),
                admin(),
            )
            .await
            .unwrap();
        assert!(!created.has_warnings());
        assert!(created.value.is_active);

        let plaintext = f
            .service
            .get_decrypted("openai", "default")
            .await
            .unwrap();
        assert_eq!(plaintext.as_str(), "sk-test-1234567890");

        // 存储的是密文
        let conn = f.db.connect().unwrap();
        let record = SecretDao::get(&conn, created.value.id).unwrap().unwrap();
        assert_ne!(record.ciphertext, "sk-test-1234567890");
        assert_eq!(record.salt.len(), 64);

        let logs = f
            .service
            .get_audit_logs(Some(created.value.id), 0, 0)
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, AuditAction::Create);
        assert_eq!(logs[0].operator_id, Some(1));
        assert!(logs[0].old_value.is_none());
        let new_value = logs[0].new_value.as_deref().unwrap();
        assert!(!new_value.contains("sk-test-1234567890"));
        assert!(!new_value.contains(&record.ciphertext));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_request() {
        let f = fixture();
        let result = f
            .service
            .create(CreateSecretRequest::new("openai", "default", "short"), admin())
            .await;
        assert!(matches!(result, Err(CredentialError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_rotate_replaces_secret_and_invalidates_cache() {
        let f = fixture();
        let first = f
            .service
            .create(
                CreateSecretRequest::new("deepseek", "default", "sk-old-value-0001"),
                admin(),
            )
            .await
            .unwrap();
        assert_eq!(
            f.service
                .get_decrypted("deepseek", "default")
                .await
                .unwrap()
                .as_str(),
            "sk-old-value-0001"
        );

        f.service
            .update_status(first.value.id, false, admin())
            .await
            .unwrap();

        let second = f
            .service
            .create(
                CreateSecretRequest::new("deepseek", "default", "sk-new-value-0002"),
                admin(),
            )
            .await
            .unwrap();
        assert_eq!(second.value.id, first.value.id);
        assert!(!second.value.is_active);
        assert!(matches!(
            f.service.get_decrypted("deepseek", "default").await,
            Err(CredentialError::SecretInactive { .. })
        ));

        f.service
            .update_status(first.value.id, true, admin())
            .await
            .unwrap();
        assert_eq!(
            f.service
                .get_decrypted("deepseek", "default")
                .await
                .unwrap()
                .as_str(),
            "sk-new-value-0002"
        );

        let logs = f
            .service
            .get_audit_logs(Some(first.value.id), 20, 0)
            .await
            .unwrap();
        let actions: Vec<AuditAction> = logs.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::Activate,
                AuditAction::Update,
                AuditAction::Deactivate,
                AuditAction::Create
            ]
        );
        assert!(logs[1].old_value.is_some());
    }

    #[tokio::test]
    async fn test_inactive_and_missing_secrets() {
        let f = fixture();
        let created = f
            .service
            .create(
                CreateSecretRequest::new("openai", "default", "sk-test-1234567890"),
                admin(),
            )
            .await
            .unwrap();
        f.service.get_decrypted("openai", "default").await.unwrap();

        f.service
            .update_status(created.value.id, false, admin())
            .await
            .unwrap();
        assert!(matches!(
            f.service.get_decrypted("openai", "default").await,
            Err(CredentialError::SecretInactive { .. })
        ));

        assert!(matches!(
            f.service.get_decrypted("openai", "missing").await,
            Err(CredentialError::SecretNotFound { .. })
        ));
        assert!(matches!(
            f.service.update_status(9999, true, admin()).await,
            Err(CredentialError::SecretIdNotFound(9999))
        ));
    }

    #[tokio::test]
    async fn test_preferred_selection() {
        let f = fixture();
        for (name, secret, priority) in [
            ("backup", "sk-backup-000001", 10),
            ("primary", "sk-primary-00001", 90),
            ("secondary", "sk-secondary-001", 90),
        ] {
            f.service
                .create(
                    CreateSecretRequest::new("gemini", name, secret).with_priority(priority),
                    admin(),
                )
                .await
                .unwrap();
        }

        let chosen = f.service.get_decrypted_preferred("gemini").await.unwrap();
        assert_eq!(chosen.as_str(), "sk-primary-00001");

        assert!(matches!(
            f.service.get_decrypted_preferred("anthropic").await,
            Err(CredentialError::NoActiveSecret(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_is_audited_and_invalidates_cache() {
        let f = fixture();
        let created = f
            .service
            .create(
                CreateSecretRequest::new("openai", "default", "sk-test-1234567890"),
                admin(),
            )
            .await
            .unwrap();
        f.service.get_decrypted("openai", "default").await.unwrap();
        assert_eq!(f.service.cache().len(), 1);

        let deleted = f.service.delete(created.value.id, admin()).await.unwrap();
        assert_eq!(deleted.value.id, created.value.id);
        assert!(f.service.cache().is_empty());

        assert!(matches!(
            f.service.get_decrypted("openai", "default").await,
            Err(CredentialError::SecretNotFound { .. })
        ));
        assert!(matches!(
            f.service.delete(created.value.id, admin()).await,
            Err(CredentialError::SecretIdNotFound(_))
        ));

        let logs = f
            .service
            .get_audit_logs(Some(created.value.id), 20, 0)
            .await
            .unwrap();
        assert_eq!(logs[0].action, AuditAction::Delete);
        assert!(logs[0].new_value.is_none());
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_roll_back() {
        let f = fixture();
        f.db
            .connect()
            .unwrap()
            .execute("DROP TABLE secret_audit_log", [])
            .unwrap();

        let created = f
            .service
            .create(
                CreateSecretRequest::new("openai", "default", "sk-test-1234567890"),
                admin(),
            )
            .await
            .unwrap();
        assert!(created.has_warnings());

        let fetched = f.service.get_by_id(created.value.id).await.unwrap();
        assert_eq!(fetched.key_name, "default");
    }

    #[tokio::test]
    async fn test_list_pagination_and_filter() {
        let f = fixture();
        for i in 0..5 {
            f.service
                .create(
                    CreateSecretRequest::new("openai", format!("key-{}", i), "sk-test-1234567890"),
                    admin(),
                )
                .await
                .unwrap();
        }
        let other = f
            .service
            .create(
                CreateSecretRequest::new("deepseek", "default", "sk-test-1234567890"),
                admin(),
            )
            .await
            .unwrap();
        f.service
            .update_status(other.value.id, false, admin())
            .await
            .unwrap();

        let all = f
            .service
            .list(SecretFilter::default(), PageRequest::new(1, 4))
            .await
            .unwrap();
        assert_eq!(all.total, 6);
        assert_eq!(all.items.len(), 4);

        let second = f
            .service
            .list(SecretFilter::default(), PageRequest::new(2, 4))
            .await
            .unwrap();
        assert_eq!(second.items.len(), 2);

        let active = f
            .service
            .list(SecretFilter::default().active_only(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(active.total, 5);

        let deepseek = f
            .service
            .list(SecretFilter::provider("deepseek"), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(deepseek.total, 1);
        assert!(!deepseek.items[0].is_active);
    }

    #[tokio::test]
    async fn test_usage_counted_after_shutdown() {
        let f = fixture_with(CredentialConfig {
            cache_ttl_secs: 0,
            ..Default::default()
        });
        let created = f
            .service
            .create(
                CreateSecretRequest::new("openai", "default", "sk-test-1234567890"),
                admin(),
            )
            .await
            .unwrap();

        for _ in 0..3 {
            f.service.get_decrypted("openai", "default").await.unwrap();
        }
        let Fixture { _dir, db, service } = f;
        service.shutdown().await;

        let conn = db.connect().unwrap();
        let record = SecretDao::get(&conn, created.value.id).unwrap().unwrap();
        assert_eq!(record.usage_count, 3);
        drop(_dir);
    }

    #[tokio::test]
    async fn test_wrong_master_key_fails_decrypt() {
        let f = fixture();
        f.service
            .create(
                CreateSecretRequest::new("openai", "default", "sk-test-1234567890"),
                admin(),
            )
            .await
            .unwrap();

        let other = ChaChaEncryptor::with_iterations(&[9u8; 32], TEST_ITERATIONS).unwrap();
        let service =
            CredentialService::new(f.db.clone(), Arc::new(other), CredentialConfig::default());
        assert!(matches!(
            service.get_decrypted("openai", "default").await,
            Err(CredentialError::Crypto(CryptoError::DecryptionFailed))
        ));
    }

    #[test]
    fn test_normalize_audit_limit() {
        assert_eq!(normalize_audit_limit(0), 20);
        assert_eq!(normalize_audit_limit(5), 5);
        assert_eq!(normalize_audit_limit(500), 100);
    }
}
