//! 密钥审计日志数据访问对象
//!
//! 只提供追加与查询，不提供修改或删除。

use bblearning_core::time::{from_millis, to_millis};
use bblearning_core::{StoreError, StoreResult};
use rusqlite::{params, Connection, Row};

use crate::types::{AuditAction, NewAuditEntry, SecretAuditEntry};

struct AuditRow {
    id: i64,
    secret_id: Option<i64>,
    action: String,
    operator_id: Option<i64>,
    operator_ip: Option<String>,
    old_value: Option<String>,
    new_value: Option<String>,
    created_at: i64,
    user_agent: Option<String>,
    request_id: Option<String>,
}

impl AuditRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            secret_id: row.get(1)?,
            action: row.get(2)?,
            operator_id: row.get(3)?,
            operator_ip: row.get(4)?,
            old_value: row.get(5)?,
            new_value: row.get(6)?,
            created_at: row.get(7)?,
            user_agent: row.get(8)?,
            request_id: row.get(9)?,
        })
    }

    fn into_entry(self) -> StoreResult<SecretAuditEntry> {
        let action = AuditAction::parse(&self.action).ok_or_else(|| {
            StoreError::CorruptRow(format!("未知的审计操作类型: {}", self.action))
        })?;

        Ok(SecretAuditEntry {
            id: self.id,
            secret_id: self.secret_id,
            action,
            operator_id: self.operator_id,
            operator_ip: self.operator_ip,
            old_value: self.old_value,
            new_value: self.new_value,
            created_at: from_millis(self.created_at),
            user_agent: self.user_agent,
            request_id: self.request_id,
        })
    }
}

pub struct SecretAuditDao;

impl SecretAuditDao {
    /// 追加一条审计日志
    pub fn append(conn: &Connection, entry: &NewAuditEntry) -> StoreResult<i64> {
        conn.execute(
            "INSERT INTO secret_audit_log
             (secret_id, action, operator_id, operator_ip, old_value, new_value,
              created_at, user_agent, request_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.secret_id,
                entry.action.as_str(),
                entry.context.operator_id,
                entry.context.operator_ip,
                entry.old_value,
                entry.new_value,
                to_millis(entry.created_at),
                entry.context.user_agent,
                entry.context.request_id,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 按时间倒序查询审计日志，`secret_id` 为空时查询全部
    pub fn list(
        conn: &Connection,
        secret_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<SecretAuditEntry>> {
        let mut stmt = conn.prepare(
            "SELECT id, secret_id, action, operator_id, operator_ip, old_value, new_value,
                    created_at, user_agent, request_id
             FROM secret_audit_log
             WHERE (?1 IS NULL OR secret_id = ?1)
             ORDER BY created_at DESC, id DESC
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![secret_id, limit, offset], AuditRow::from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }
}
