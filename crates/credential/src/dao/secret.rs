//! 密钥数据访问对象
//!
//! 所有函数接收 `&Connection`，既可直接使用连接，也可在事务或保存点内调用。

use bblearning_core::time::{from_millis, opt_from_millis, to_millis};
use bblearning_core::StoreResult;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::types::{EncryptedFields, NewSecret, SecretRecord};

const SECRET_COLUMNS: &str = "id, provider, key_name, ciphertext, salt, nonce, is_active, priority,
     description, metadata, created_at, updated_at, created_by, updated_by,
     last_used_at, usage_count";

/// 数据库行结构
struct SecretRow {
    id: i64,
    provider: String,
    key_name: String,
    ciphertext: String,
    salt: String,
    nonce: String,
    is_active: bool,
    priority: i32,
    description: String,
    metadata: Option<String>,
    created_at: i64,
    updated_at: i64,
    created_by: Option<i64>,
    updated_by: Option<i64>,
    last_used_at: Option<i64>,
    usage_count: i64,
}

impl SecretRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            provider: row.get(1)?,
            key_name: row.get(2)?,
            ciphertext: row.get(3)?,
            salt: row.get(4)?,
            nonce: row.get(5)?,
            is_active: row.get(6)?,
            priority: row.get(7)?,
            description: row.get(8)?,
            metadata: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            created_by: row.get(12)?,
            updated_by: row.get(13)?,
            last_used_at: row.get(14)?,
            usage_count: row.get(15)?,
        })
    }

    fn into_record(self) -> SecretRecord {
        SecretRecord {
            id: self.id,
            provider: self.provider,
            key_name: self.key_name,
            ciphertext: self.ciphertext,
            salt: self.salt,
            nonce: self.nonce,
            is_active: self.is_active,
            priority: self.priority,
            description: self.description,
            metadata: self.metadata,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
            created_by: self.created_by,
            updated_by: self.updated_by,
            last_used_at: opt_from_millis(self.last_used_at),
            usage_count: self.usage_count,
        }
    }
}

fn collect(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<SecretRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, SecretRow::from_row)?;

    let mut secrets = Vec::new();
    for row in rows {
        secrets.push(row?.into_record());
    }
    Ok(secrets)
}

pub struct SecretDao;

impl SecretDao {
    /// 新建密钥，返回自增 ID
    pub fn insert(conn: &Connection, secret: &NewSecret, now: DateTime<Utc>) -> StoreResult<i64> {
        let now = to_millis(now);
        conn.execute(
            "INSERT INTO secrets
             (provider, key_name, ciphertext, salt, nonce, is_active, priority, description,
              metadata, created_at, updated_at, created_by, updated_by, usage_count)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?8, ?9, ?9, ?10, ?10, 0)",
            params![
                secret.provider,
                secret.key_name,
                secret.encrypted.ciphertext,
                secret.encrypted.salt,
                secret.encrypted.nonce,
                secret.priority,
                secret.description,
                secret.metadata,
                now,
                secret.operator_id,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 按 ID 获取
    pub fn get(conn: &Connection, id: i64) -> StoreResult<Option<SecretRecord>> {
        let sql = format!("SELECT {} FROM secrets WHERE id = ?1", SECRET_COLUMNS);
        let row = conn
            .query_row(&sql, params![id], SecretRow::from_row)
            .optional()?;
        Ok(row.map(SecretRow::into_record))
    }

    /// 按 (provider, key_name) 获取，不区分启用状态
    pub fn get_by_name(
        conn: &Connection,
        provider: &str,
        key_name: &str,
    ) -> StoreResult<Option<SecretRecord>> {
        let sql = format!(
            "SELECT {} FROM secrets WHERE provider = ?1 AND key_name = ?2",
            SECRET_COLUMNS
        );
        let row = conn
            .query_row(&sql, params![provider, key_name], SecretRow::from_row)
            .optional()?;
        Ok(row.map(SecretRow::into_record))
    }

    /// 列出提供商下的启用密钥，按优先级降序、创建时间升序
    pub fn list_active_by_provider(
        conn: &Connection,
        provider: &str,
    ) -> StoreResult<Vec<SecretRecord>> {
        let sql = format!(
            "SELECT {} FROM secrets WHERE provider = ?1 AND is_active = 1
             ORDER BY priority DESC, created_at ASC, id ASC",
            SECRET_COLUMNS
        );
        collect(conn, &sql, params![provider])
    }

    /// 分页列出密钥
    pub fn list(
        conn: &Connection,
        provider: Option<&str>,
        include_inactive: bool,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<SecretRecord>> {
        let sql = format!(
            "SELECT {} FROM secrets
             WHERE (?1 IS NULL OR provider = ?1) AND (?2 = 1 OR is_active = 1)
             ORDER BY provider ASC, priority DESC, created_at ASC, id ASC
             LIMIT ?3 OFFSET ?4",
            SECRET_COLUMNS
        );
        collect(conn, &sql, params![provider, include_inactive, limit, offset])
    }

    pub fn count(
        conn: &Connection,
        provider: Option<&str>,
        include_inactive: bool,
    ) -> StoreResult<i64> {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM secrets
             WHERE (?1 IS NULL OR provider = ?1) AND (?2 = 1 OR is_active = 1)",
            params![provider, include_inactive],
            |row| row.get(0),
        )?)
    }

    /// 轮换密钥：一次性替换密文、盐值、nonce，启用状态保持不变
    #[allow(clippy::too_many_arguments)]
    pub fn rotate(
        conn: &Connection,
        id: i64,
        encrypted: &EncryptedFields,
        description: &str,
        priority: i32,
        metadata: Option<&str>,
        updated_by: Option<i64>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let affected = conn.execute(
            "UPDATE secrets
             SET ciphertext = ?1, salt = ?2, nonce = ?3, description = ?4, priority = ?5,
                 metadata = ?6, updated_by = ?7, updated_at = ?8
             WHERE id = ?9",
            params![
                encrypted.ciphertext,
                encrypted.salt,
                encrypted.nonce,
                description,
                priority,
                metadata,
                updated_by,
                to_millis(now),
                id,
            ],
        )?;
        Ok(affected > 0)
    }

    /// 更新启用状态
    pub fn update_status(
        conn: &Connection,
        id: i64,
        is_active: bool,
        updated_by: Option<i64>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let affected = conn.execute(
            "UPDATE secrets SET is_active = ?1, updated_by = ?2, updated_at = ?3 WHERE id = ?4",
            params![is_active, updated_by, to_millis(now), id],
        )?;
        Ok(affected > 0)
    }

    /// 记录一次使用
    pub fn record_usage(conn: &Connection, id: i64, now: DateTime<Utc>) -> StoreResult<bool> {
        let affected = conn.execute(
            "UPDATE secrets SET usage_count = usage_count + 1, last_used_at = ?1 WHERE id = ?2",
            params![to_millis(now), id],
        )?;
        Ok(affected > 0)
    }

    /// 删除密钥（硬删除）
    pub fn delete(conn: &Connection, id: i64) -> StoreResult<bool> {
        let affected = conn.execute("DELETE FROM secrets WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}
