//! 配额服务
//!
//! 每个用户一个配额账户，包含日/月/永久三类配额。扣减按
//! 永久 → 月 → 日 的顺序贪心进行，整个过程在一个 `BEGIN IMMEDIATE`
//! 事务中完成：要么全额扣减，要么不做任何修改。
//!
//! 流水在保存点内写入，写入失败只产生告警，不回滚扣减或充值。

use async_trait::async_trait;
use bblearning_core::time::{next_day_boundary, next_month_boundary};
use bblearning_core::{in_savepoint, Database, Page, PageRequest, StoreError, WithWarnings};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::dao::{QuotaAccountDao, QuotaLedgerDao};
use crate::error::{QuotaError, QuotaResult};
use crate::types::{
    draw_description, AccountDefaults, ConsumeReceipt, QuotaAccount, QuotaCheck, QuotaInfo,
    QuotaLedgerEntry, QuotaTier, RechargeLedgerEntry, RechargeMethod, RechargeRequest,
    RequestMeta, ServiceType,
};

/// VIP 赠送配额的充值原因
pub const VIP_GRANT_REASON: &str = "VIP赠送";

/// 配额扣减接口
///
/// 调用外部 AI 服务前由业务模块调用。
#[async_trait]
pub trait QuotaGate: Send + Sync {
    async fn check_and_consume(
        &self,
        user_id: i64,
        amount: i64,
        service_type: ServiceType,
        meta: RequestMeta,
    ) -> QuotaResult<WithWarnings<ConsumeReceipt>>;
}

#[derive(Debug, Clone)]
pub struct QuotaService {
    db: Database,
    defaults: AccountDefaults,
    tz: Tz,
}

impl QuotaService {
    pub fn new(db: Database, defaults: AccountDefaults, tz: Tz) -> Self {
        Self { db, defaults, tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// 检查并扣减配额
    pub async fn check_and_consume(
        &self,
        user_id: i64,
        amount: i64,
        service_type: ServiceType,
        meta: RequestMeta,
    ) -> QuotaResult<WithWarnings<ConsumeReceipt>> {
        if amount <= 0 {
            return Err(QuotaError::InvalidAmount(amount));
        }

        let this = self.clone();
        let result =
            run_blocking(move || this.consume_blocking(user_id, amount, service_type, &meta))
                .await;

        match &result {
            Ok(receipt) => debug!(
                "[QuotaService] 用户 {} 扣减 {} ({})，剩余 {}",
                user_id,
                amount,
                service_type.as_str(),
                receipt.value.info.total_available
            ),
            Err(QuotaError::InsufficientQuota {
                required,
                available,
            }) => info!(
                "[QuotaService] 用户 {} 配额不足: 需要 {}，可用 {}",
                user_id, required, available
            ),
            Err(e) => warn!("[QuotaService] 用户 {} 扣减失败: {}", user_id, e),
        }
        result
    }

    /// 只检查配额是否足够，不做任何写入
    pub async fn check_quota(&self, user_id: i64, amount: i64) -> QuotaResult<QuotaCheck> {
        if amount <= 0 {
            return Err(QuotaError::InvalidAmount(amount));
        }

        let this = self.clone();
        run_blocking(move || {
            let now = Utc::now();
            let conn = this.db.connect()?;
            let mut account = match QuotaAccountDao::get(&conn, user_id)? {
                Some(account) => account,
                None => {
                    if QuotaAccountDao::is_deactivated(&conn, user_id)? {
                        return Err(QuotaError::AccountNotFound(user_id));
                    }
                    QuotaAccount::projected(user_id, this.defaults, now, this.tz)
                }
            };
            account.apply_due_resets(now, this.tz);

            let available = account.total_available();
            Ok(QuotaCheck {
                sufficient: available >= amount,
                required: amount,
                available,
            })
        })
        .await
    }

    /// 获取用户配额（不存在时以默认值创建）
    pub async fn get_user_quota(&self, user_id: i64) -> QuotaResult<QuotaInfo> {
        let this = self.clone();
        run_blocking(move || {
            let now = Utc::now();
            let mut conn = this.db.connect()?;
            let tx = Database::begin_immediate(&mut conn)?;
            let account = this.load_account(&tx, user_id, now)?;
            tx.commit().map_err(StoreError::from)?;
            Ok(account.to_info())
        })
        .await
    }

    /// 充值配额：日/月配额增加上限，永久配额增加余额
    pub async fn recharge_quota(
        &self,
        request: RechargeRequest,
    ) -> QuotaResult<WithWarnings<QuotaInfo>> {
        if request.amount <= 0 {
            return Err(QuotaError::InvalidAmount(request.amount));
        }

        let this = self.clone();
        run_blocking(move || {
            let now = Utc::now();
            let mut conn = this.db.connect()?;
            let mut tx = Database::begin_immediate(&mut conn)?;
            let account = this.load_account(&tx, request.user_id, now)?;
            if !account.can_add(request.tier, request.amount) {
                return Err(QuotaError::InvalidAmount(request.amount));
            }

            QuotaAccountDao::add_quota(&tx, request.user_id, request.tier, request.amount, now)?;

            let mut warnings = Vec::new();
            record_recharge(&mut tx, &request, now, &mut warnings);

            let account = QuotaAccountDao::get(&tx, request.user_id)?
                .ok_or(QuotaError::AccountNotFound(request.user_id))?;
            tx.commit().map_err(StoreError::from)?;

            info!(
                "[QuotaService] 用户 {} 充值 {} {} ({})",
                request.user_id,
                request.tier.as_str(),
                request.amount,
                request.method.as_str()
            );
            Ok(WithWarnings::new(account.to_info(), warnings))
        })
        .await
    }

    /// 设置 VIP，`extra_permanent` 大于 0 时在同一事务内赠送永久配额
    pub async fn set_vip(
        &self,
        user_id: i64,
        expire_at: DateTime<Utc>,
        extra_permanent: i64,
        operator_id: Option<i64>,
    ) -> QuotaResult<WithWarnings<QuotaInfo>> {
        if expire_at <= Utc::now() {
            return Err(QuotaError::InvalidVipExpiry);
        }
        if extra_permanent < 0 {
            return Err(QuotaError::InvalidAmount(extra_permanent));
        }

        let this = self.clone();
        run_blocking(move || {
            let now = Utc::now();
            let mut conn = this.db.connect()?;
            let mut tx = Database::begin_immediate(&mut conn)?;
            let account = this.load_account(&tx, user_id, now)?;
            if !account.can_add(QuotaTier::Permanent, extra_permanent) {
                return Err(QuotaError::InvalidAmount(extra_permanent));
            }

            QuotaAccountDao::set_vip(&tx, user_id, expire_at, now)?;

            let mut warnings = Vec::new();
            if extra_permanent > 0 {
                QuotaAccountDao::add_quota(
                    &tx,
                    user_id,
                    QuotaTier::Permanent,
                    extra_permanent,
                    now,
                )?;
                let grant = RechargeRequest {
                    user_id,
                    tier: QuotaTier::Permanent,
                    amount: extra_permanent,
                    reason: VIP_GRANT_REASON.to_string(),
                    operator_id,
                    method: RechargeMethod::Vip,
                    order_id: None,
                };
                record_recharge(&mut tx, &grant, now, &mut warnings);
            }

            let account = QuotaAccountDao::get(&tx, user_id)?
                .ok_or(QuotaError::AccountNotFound(user_id))?;
            tx.commit().map_err(StoreError::from)?;

            info!(
                "[QuotaService] 用户 {} 设为 VIP，到期 {}，赠送永久配额 {}",
                user_id, expire_at, extra_permanent
            );
            Ok(WithWarnings::new(account.to_info(), warnings))
        })
        .await
    }

    /// 取消 VIP
    pub async fn cancel_vip(&self, user_id: i64) -> QuotaResult<QuotaInfo> {
        let this = self.clone();
        run_blocking(move || {
            let now = Utc::now();
            let mut conn = this.db.connect()?;
            let tx = Database::begin_immediate(&mut conn)?;
            if !QuotaAccountDao::cancel_vip(&tx, user_id, now)? {
                return Err(QuotaError::AccountNotFound(user_id));
            }
            let account = this.load_account(&tx, user_id, now)?;
            tx.commit().map_err(StoreError::from)?;

            info!("[QuotaService] 用户 {} 已取消 VIP", user_id);
            Ok(account.to_info())
        })
        .await
    }

    /// 取消所有已过期的 VIP，返回处理数量
    pub async fn process_expired_vips(&self) -> QuotaResult<usize> {
        let db = self.db.clone();
        let count = run_blocking(move || {
            let conn = db.connect()?;
            Ok(QuotaAccountDao::cancel_expired_vips(&conn, Utc::now())?)
        })
        .await?;

        if count > 0 {
            info!("[QuotaService] 已取消 {} 个过期 VIP", count);
        }
        Ok(count)
    }

    /// 批量重置到期的日配额，返回处理数量
    pub async fn reset_daily_quotas(&self) -> QuotaResult<usize> {
        let this = self.clone();
        let count = run_blocking(move || {
            let now = Utc::now();
            let conn = this.db.connect()?;
            let next = next_day_boundary(now, this.tz);
            Ok(QuotaAccountDao::reset_all_daily(&conn, next, now)?)
        })
        .await?;

        info!("[QuotaService] 日配额重置完成，影响 {} 个账户", count);
        Ok(count)
    }

    /// 批量重置到期的月配额，返回处理数量
    pub async fn reset_monthly_quotas(&self) -> QuotaResult<usize> {
        let this = self.clone();
        let count = run_blocking(move || {
            let now = Utc::now();
            let conn = this.db.connect()?;
            let next = next_month_boundary(now, this.tz);
            Ok(QuotaAccountDao::reset_all_monthly(&conn, next, now)?)
        })
        .await?;

        info!("[QuotaService] 月配额重置完成，影响 {} 个账户", count);
        Ok(count)
    }

    /// 分页查询消费流水
    pub async fn get_quota_logs(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> QuotaResult<Page<QuotaLedgerEntry>> {
        let db = self.db.clone();
        run_blocking(move || {
            let conn = db.connect()?;
            let (items, total) =
                QuotaLedgerDao::list_consumption(&conn, user_id, page.limit(), page.offset())?;
            Ok(Page {
                items,
                total,
                page: page.page,
                page_size: page.page_size,
            })
        })
        .await
    }

    /// 分页查询充值流水
    pub async fn get_recharge_logs(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> QuotaResult<Page<RechargeLedgerEntry>> {
        let db = self.db.clone();
        run_blocking(move || {
            let conn = db.connect()?;
            let (items, total) =
                QuotaLedgerDao::list_recharge(&conn, user_id, page.limit(), page.offset())?;
            Ok(Page {
                items,
                total,
                page: page.page,
                page_size: page.page_size,
            })
        })
        .await
    }

    /// 注销账户，之后的所有操作都视其不存在
    pub async fn deactivate_account(&self, user_id: i64) -> QuotaResult<()> {
        let db = self.db.clone();
        run_blocking(move || {
            let conn = db.connect()?;
            if !QuotaAccountDao::soft_delete(&conn, user_id, Utc::now())? {
                return Err(QuotaError::AccountNotFound(user_id));
            }
            info!("[QuotaService] 用户 {} 配额账户已注销", user_id);
            Ok(())
        })
        .await
    }

    /// 读取账户：不存在时创建，到期时重置
    fn load_account(
        &self,
        conn: &Connection,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> QuotaResult<QuotaAccount> {
        let account = match QuotaAccountDao::get(conn, user_id)? {
            Some(account) => account,
            None => {
                if QuotaAccountDao::insert_default(
                    conn,
                    user_id,
                    self.defaults,
                    next_day_boundary(now, self.tz),
                    next_month_boundary(now, self.tz),
                    now,
                )? {
                    debug!("[QuotaService] 为用户 {} 创建配额账户", user_id);
                }
                QuotaAccountDao::get(conn, user_id)?.ok_or(QuotaError::AccountNotFound(user_id))?
            }
        };

        if !account.needs_daily_reset(now) && !account.needs_monthly_reset(now) {
            return Ok(account);
        }

        let daily = QuotaAccountDao::reset_daily_if_due(
            conn,
            user_id,
            next_day_boundary(now, self.tz),
            now,
        )?;
        let monthly = QuotaAccountDao::reset_monthly_if_due(
            conn,
            user_id,
            next_month_boundary(now, self.tz),
            now,
        )?;
        debug!(
            "[QuotaService] 用户 {} 惰性重置 daily={} monthly={}",
            user_id, daily, monthly
        );

        QuotaAccountDao::get(conn, user_id)?.ok_or(QuotaError::AccountNotFound(user_id))
    }

    fn consume_blocking(
        &self,
        user_id: i64,
        amount: i64,
        service_type: ServiceType,
        meta: &RequestMeta,
    ) -> QuotaResult<WithWarnings<ConsumeReceipt>> {
        let now = Utc::now();
        let mut conn = self.db.connect()?;
        let mut tx = Database::begin_immediate(&mut conn)?;

        let mut account = self.load_account(&tx, user_id, now)?;
        let available = account.total_available();
        // 余额不足时直接返回，事务回滚
        let draws = account
            .plan_draws(amount)
            .ok_or(QuotaError::InsufficientQuota {
                required: amount,
                available,
            })?;

        account.apply_draws(&draws, now);
        if !QuotaAccountDao::save_consumption(&tx, &account)? {
            return Err(StoreError::ConcurrentUpdateConflict(format!(
                "配额账户 user_id={} 在事务内消失",
                user_id
            ))
            .into());
        }

        let combined = draws.len() > 1;
        let mut warnings = Vec::new();
        for draw in &draws {
            let description = draw_description(draw, combined);
            let written = in_savepoint(&mut tx, |conn| {
                QuotaLedgerDao::append_consumption(
                    conn,
                    user_id,
                    draw,
                    service_type,
                    &description,
                    meta,
                    now,
                )
            });
            if let Err(e) = written {
                warn!(
                    "[QuotaService] 用户 {} 消费流水写入失败 ({}): {}",
                    user_id, description, e
                );
                warnings.push(format!("消费流水写入失败: {}", e));
            }
        }

        tx.commit().map_err(StoreError::from)?;
        Ok(WithWarnings::new(
            ConsumeReceipt {
                draws,
                info: account.to_info(),
            },
            warnings,
        ))
    }
}

#[async_trait]
impl QuotaGate for QuotaService {
    async fn check_and_consume(
        &self,
        user_id: i64,
        amount: i64,
        service_type: ServiceType,
        meta: RequestMeta,
    ) -> QuotaResult<WithWarnings<ConsumeReceipt>> {
        QuotaService::check_and_consume(self, user_id, amount, service_type, meta).await
    }
}

/// 在保存点内写充值流水，失败转为告警
fn record_recharge(
    tx: &mut rusqlite::Transaction<'_>,
    request: &RechargeRequest,
    now: DateTime<Utc>,
    warnings: &mut Vec<String>,
) {
    let written = in_savepoint(tx, |conn| {
        QuotaLedgerDao::append_recharge(
            conn,
            request.user_id,
            request.tier,
            request.amount,
            &request.reason,
            request.operator_id,
            request.method,
            request.order_id.as_deref(),
            now,
        )
    });
    if let Err(e) = written {
        warn!(
            "[QuotaService] 用户 {} 充值流水写入失败: {}",
            request.user_id, e
        );
        warnings.push(format!("充值流水写入失败: {}", e));
    }
}

async fn run_blocking<T, F>(f: F) -> QuotaResult<T>
where
    F: FnOnce() -> QuotaResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| QuotaError::TaskFailed(e.to_string()))?
}
