//! 配额账户数据访问对象
//!
//! 所有查询与更新都排除已注销（`deleted_at` 非空）的账户。
//! 重置与 VIP 过期都是条件更新，重复执行不会产生额外影响。

use bblearning_core::time::{from_millis, opt_from_millis, to_millis};
use bblearning_core::StoreResult;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::types::{AccountDefaults, QuotaAccount, QuotaTier};

const ACCOUNT_COLUMNS: &str = "id, user_id, daily_quota, daily_used, daily_reset_at,
     monthly_quota, monthly_used, monthly_reset_at, permanent_quota, is_vip, vip_expire_at,
     total_consumed, last_consume_at, created_at, updated_at";

struct AccountRow {
    id: i64,
    user_id: i64,
    daily_quota: i64,
    daily_used: i64,
    daily_reset_at: i64,
    monthly_quota: i64,
    monthly_used: i64,
    monthly_reset_at: i64,
    permanent_quota: i64,
    is_vip: bool,
    vip_expire_at: Option<i64>,
    total_consumed: i64,
    last_consume_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl AccountRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            daily_quota: row.get(2)?,
            daily_used: row.get(3)?,
            daily_reset_at: row.get(4)?,
            monthly_quota: row.get(5)?,
            monthly_used: row.get(6)?,
            monthly_reset_at: row.get(7)?,
            permanent_quota: row.get(8)?,
            is_vip: row.get(9)?,
            vip_expire_at: row.get(10)?,
            total_consumed: row.get(11)?,
            last_consume_at: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_account(self) -> QuotaAccount {
        QuotaAccount {
            id: self.id,
            user_id: self.user_id,
            daily_quota: self.daily_quota,
            daily_used: self.daily_used,
            daily_reset_at: from_millis(self.daily_reset_at),
            monthly_quota: self.monthly_quota,
            monthly_used: self.monthly_used,
            monthly_reset_at: from_millis(self.monthly_reset_at),
            permanent_quota: self.permanent_quota,
            is_vip: self.is_vip,
            vip_expire_at: opt_from_millis(self.vip_expire_at),
            total_consumed: self.total_consumed,
            last_consume_at: opt_from_millis(self.last_consume_at),
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        }
    }
}

pub struct QuotaAccountDao;

impl QuotaAccountDao {
    /// 获取未注销的账户
    pub fn get(conn: &Connection, user_id: i64) -> StoreResult<Option<QuotaAccount>> {
        let sql = format!(
            "SELECT {} FROM quota_accounts WHERE user_id = ?1 AND deleted_at IS NULL",
            ACCOUNT_COLUMNS
        );
        let row = conn
            .query_row(&sql, params![user_id], AccountRow::from_row)
            .optional()?;
        Ok(row.map(AccountRow::into_account))
    }

    /// 账户是否已注销
    pub fn is_deactivated(conn: &Connection, user_id: i64) -> StoreResult<bool> {
        Ok(conn.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM quota_accounts WHERE user_id = ?1 AND deleted_at IS NOT NULL
             )",
            params![user_id],
            |row| row.get(0),
        )?)
    }

    /// 以默认配额创建账户，已存在（含已注销）时忽略，返回是否新建
    pub fn insert_default(
        conn: &Connection,
        user_id: i64,
        defaults: AccountDefaults,
        daily_reset_at: DateTime<Utc>,
        monthly_reset_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let now = to_millis(now);
        let affected = conn.execute(
            "INSERT OR IGNORE INTO quota_accounts
             (user_id, daily_quota, daily_used, daily_reset_at, monthly_quota, monthly_used,
              monthly_reset_at, permanent_quota, is_vip, total_consumed, created_at, updated_at)
             VALUES (?1, ?2, 0, ?3, ?4, 0, ?5, ?6, 0, 0, ?7, ?7)",
            params![
                user_id,
                defaults.daily_quota,
                to_millis(daily_reset_at),
                defaults.monthly_quota,
                to_millis(monthly_reset_at),
                defaults.permanent_quota,
                now,
            ],
        )?;
        Ok(affected > 0)
    }

    /// 到期时重置单个账户的日配额
    pub fn reset_daily_if_due(
        conn: &Connection,
        user_id: i64,
        next_reset_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let affected = conn.execute(
            "UPDATE quota_accounts SET daily_used = 0, daily_reset_at = ?1, updated_at = ?2
             WHERE user_id = ?3 AND deleted_at IS NULL AND daily_reset_at <= ?2",
            params![to_millis(next_reset_at), to_millis(now), user_id],
        )?;
        Ok(affected > 0)
    }

    /// 到期时重置单个账户的月配额
    pub fn reset_monthly_if_due(
        conn: &Connection,
        user_id: i64,
        next_reset_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let affected = conn.execute(
            "UPDATE quota_accounts SET monthly_used = 0, monthly_reset_at = ?1, updated_at = ?2
             WHERE user_id = ?3 AND deleted_at IS NULL AND monthly_reset_at <= ?2",
            params![to_millis(next_reset_at), to_millis(now), user_id],
        )?;
        Ok(affected > 0)
    }

    /// 批量重置所有到期账户的日配额，返回影响行数
    pub fn reset_all_daily(
        conn: &Connection,
        next_reset_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        Ok(conn.execute(
            "UPDATE quota_accounts SET daily_used = 0, daily_reset_at = ?1, updated_at = ?2
             WHERE deleted_at IS NULL AND daily_reset_at <= ?2",
            params![to_millis(next_reset_at), to_millis(now)],
        )?)
    }

    /// 批量重置所有到期账户的月配额，返回影响行数
    pub fn reset_all_monthly(
        conn: &Connection,
        next_reset_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        Ok(conn.execute(
            "UPDATE quota_accounts SET monthly_used = 0, monthly_reset_at = ?1, updated_at = ?2
             WHERE deleted_at IS NULL AND monthly_reset_at <= ?2",
            params![to_millis(next_reset_at), to_millis(now)],
        )?)
    }

    /// 写回扣减后的计数器
    pub fn save_consumption(conn: &Connection, account: &QuotaAccount) -> StoreResult<bool> {
        let affected = conn.execute(
            "UPDATE quota_accounts
             SET daily_used = ?1, monthly_used = ?2, permanent_quota = ?3, total_consumed = ?4,
                 last_consume_at = ?5, updated_at = ?6
             WHERE user_id = ?7 AND deleted_at IS NULL",
            params![
                account.daily_used,
                account.monthly_used,
                account.permanent_quota,
                account.total_consumed,
                account.last_consume_at.map(to_millis),
                to_millis(account.updated_at),
                account.user_id,
            ],
        )?;
        Ok(affected > 0)
    }

    /// 增加配额上限（永久配额增加余额）
    pub fn add_quota(
        conn: &Connection,
        user_id: i64,
        tier: QuotaTier,
        amount: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let sql = match tier {
            QuotaTier::Daily => {
                "UPDATE quota_accounts SET daily_quota = daily_quota + ?1, updated_at = ?2
                 WHERE user_id = ?3 AND deleted_at IS NULL"
            }
            QuotaTier::Monthly => {
                "UPDATE quota_accounts SET monthly_quota = monthly_quota + ?1, updated_at = ?2
                 WHERE user_id = ?3 AND deleted_at IS NULL"
            }
            QuotaTier::Permanent => {
                "UPDATE quota_accounts SET permanent_quota = permanent_quota + ?1, updated_at = ?2
                 WHERE user_id = ?3 AND deleted_at IS NULL"
            }
        };
        let affected = conn.execute(sql, params![amount, to_millis(now), user_id])?;
        Ok(affected > 0)
    }

    pub fn set_vip(
        conn: &Connection,
        user_id: i64,
        expire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let affected = conn.execute(
            "UPDATE quota_accounts SET is_vip = 1, vip_expire_at = ?1, updated_at = ?2
             WHERE user_id = ?3 AND deleted_at IS NULL",
            params![to_millis(expire_at), to_millis(now), user_id],
        )?;
        Ok(affected > 0)
    }

    pub fn cancel_vip(conn: &Connection, user_id: i64, now: DateTime<Utc>) -> StoreResult<bool> {
        let affected = conn.execute(
            "UPDATE quota_accounts SET is_vip = 0, vip_expire_at = NULL, updated_at = ?1
             WHERE user_id = ?2 AND deleted_at IS NULL",
            params![to_millis(now), user_id],
        )?;
        Ok(affected > 0)
    }

    /// 取消所有已过期的 VIP，返回影响行数
    pub fn cancel_expired_vips(conn: &Connection, now: DateTime<Utc>) -> StoreResult<usize> {
        Ok(conn.execute(
            "UPDATE quota_accounts SET is_vip = 0, vip_expire_at = NULL, updated_at = ?1
             WHERE deleted_at IS NULL AND is_vip = 1 AND vip_expire_at < ?1",
            params![to_millis(now)],
        )?)
    }

    /// 注销账户（软删除）
    pub fn soft_delete(conn: &Connection, user_id: i64, now: DateTime<Utc>) -> StoreResult<bool> {
        let affected = conn.execute(
            "UPDATE quota_accounts SET deleted_at = ?1, updated_at = ?1
             WHERE user_id = ?2 AND deleted_at IS NULL",
            params![to_millis(now), user_id],
        )?;
        Ok(affected > 0)
    }
}
