//! 消费与充值流水
//!
//! 流水只用于审计，不参与配额判断；只提供追加与分页查询。

use bblearning_core::time::{from_millis, to_millis};
use bblearning_core::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::types::{
    QuotaLedgerEntry, QuotaTier, RechargeLedgerEntry, RechargeMethod, RequestMeta, ServiceType,
    TierDraw,
};

fn parse_tier(s: &str) -> StoreResult<QuotaTier> {
    QuotaTier::parse(s).ok_or_else(|| StoreError::CorruptRow(format!("未知的配额类型: {}", s)))
}

pub struct QuotaLedgerDao;

impl QuotaLedgerDao {
    /// 追加一条消费流水
    pub fn append_consumption(
        conn: &Connection,
        user_id: i64,
        draw: &TierDraw,
        service_type: ServiceType,
        description: &str,
        meta: &RequestMeta,
        now: DateTime<Utc>,
    ) -> StoreResult<i64> {
        conn.execute(
            "INSERT INTO quota_consumption_log
             (user_id, tier, amount, service_type, description, request_id, ip, user_agent,
              created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user_id,
                draw.tier.as_str(),
                draw.amount,
                service_type.as_str(),
                description,
                meta.request_id,
                meta.ip,
                meta.user_agent,
                to_millis(now),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 追加一条充值流水
    #[allow(clippy::too_many_arguments)]
    pub fn append_recharge(
        conn: &Connection,
        user_id: i64,
        tier: QuotaTier,
        amount: i64,
        reason: &str,
        operator_id: Option<i64>,
        method: RechargeMethod,
        order_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<i64> {
        conn.execute(
            "INSERT INTO quota_recharge_log
             (user_id, tier, amount, reason, operator_id, method, order_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user_id,
                tier.as_str(),
                amount,
                reason,
                operator_id,
                method.as_str(),
                order_id,
                to_millis(now),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 分页查询消费流水（按时间倒序），返回 (记录, 总数)
    pub fn list_consumption(
        conn: &Connection,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<QuotaLedgerEntry>, i64)> {
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM quota_consumption_log WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT id, user_id, tier, amount, service_type, description, request_id, ip,
                    user_agent, created_at
             FROM quota_consumption_log WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![user_id, limit, offset], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, i64>(9)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, user_id, tier, amount, service_type, description, request_id, ip, ua, at) =
                row?;
            let service_type = ServiceType::parse(&service_type).ok_or_else(|| {
                StoreError::CorruptRow(format!("未知的服务类型: {}", service_type))
            })?;
            entries.push(QuotaLedgerEntry {
                id,
                user_id,
                tier: parse_tier(&tier)?,
                amount,
                service_type,
                description,
                request_id,
                ip,
                user_agent: ua,
                created_at: from_millis(at),
            });
        }
        Ok((entries, total))
    }

    /// 分页查询充值流水（按时间倒序），返回 (记录, 总数)
    pub fn list_recharge(
        conn: &Connection,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<RechargeLedgerEntry>, i64)> {
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM quota_recharge_log WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT id, user_id, tier, amount, reason, operator_id, method, order_id, created_at
             FROM quota_recharge_log WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![user_id, limit, offset], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, i64>(8)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, user_id, tier, amount, reason, operator_id, method, order_id, at) = row?;
            let method = RechargeMethod::parse(&method)
                .ok_or_else(|| StoreError::CorruptRow(format!("未知的充值方式: {}", method)))?;
            entries.push(RechargeLedgerEntry {
                id,
                user_id,
                tier: parse_tier(&tier)?,
                amount,
                reason,
                operator_id,
                method,
                order_id,
                created_at: from_millis(at),
            });
        }
        Ok((entries, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bblearning_core::database::schema::create_tables;
    use chrono::Duration;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    #[test]
    fn test_consumption_paging() {
        let conn = setup();
        let base = Utc::now();
        let meta = RequestMeta::generated().with_ip("10.1.1.1");
        for i in 0..5 {
            let draw = TierDraw {
                tier: QuotaTier::Daily,
                amount: i + 1,
            };
            QuotaLedgerDao::append_consumption(
                &conn,
                1,
                &draw,
                ServiceType::Chat,
                "使用日配额",
                &meta,
                base + Duration::seconds(i),
            )
            .unwrap();
        }
        let other = TierDraw {
            tier: QuotaTier::Permanent,
            amount: 1,
        };
        QuotaLedgerDao::append_consumption(&conn, 2, &other, ServiceType::Ocr, "x", &meta, base)
            .unwrap();

        let (page, total) = QuotaLedgerDao::list_consumption(&conn, 1, 2, 0).unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].amount, 5);
        assert_eq!(page[0].service_type, ServiceType::Chat);
        assert_eq!(page[0].ip.as_deref(), Some("10.1.1.1"));
        assert!(page[0].request_id.is_some());

        let (last, _) = QuotaLedgerDao::list_consumption(&conn, 1, 2, 4).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].amount, 1);
    }

    #[test]
    fn test_recharge_roundtrip() {
        let conn = setup();
        let now = Utc::now();
        QuotaLedgerDao::append_recharge(
            &conn,
            1,
            QuotaTier::Permanent,
            100,
            "VIP赠送",
            Some(9),
            RechargeMethod::Vip,
            Some("order-1"),
            now,
        )
        .unwrap();

        let (entries, total) = QuotaLedgerDao::list_recharge(&conn, 1, 20, 0).unwrap();
        assert_eq!(total, 1);
        assert_eq!(entries[0].tier, QuotaTier::Permanent);
        assert_eq!(entries[0].method, RechargeMethod::Vip);
        assert_eq!(entries[0].operator_id, Some(9));
        assert_eq!(entries[0].order_id.as_deref(), Some("order-1"));
        assert_eq!(entries[0].reason.as_deref(), Some("VIP赠送"));
    }

    #[test]
    fn test_zero_amount_rejected_by_schema() {
        let conn = setup();
        let draw = TierDraw {
            tier: QuotaTier::Daily,
            amount: 0,
        };
        let result = QuotaLedgerDao::append_consumption(
            &conn,
            1,
            &draw,
            ServiceType::Chat,
            "",
            &RequestMeta::default(),
            Utc::now(),
        );
        assert!(result.is_err());
    }
}
