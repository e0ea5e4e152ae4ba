//! 配额账户与流水类型定义

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use bblearning_core::time::{next_day_boundary, next_month_boundary};

/// 配额类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaTier {
    /// 日配额，每日零点重置
    Daily,
    /// 月配额，每月一日零点重置
    Monthly,
    /// 永久配额，不重置
    Permanent,
}

impl QuotaTier {
    /// 扣减顺序
    pub const DRAW_ORDER: [QuotaTier; 3] =
        [QuotaTier::Permanent, QuotaTier::Monthly, QuotaTier::Daily];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaTier::Daily => "daily",
            QuotaTier::Monthly => "monthly",
            QuotaTier::Permanent => "permanent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(QuotaTier::Daily),
            "monthly" => Some(QuotaTier::Monthly),
            "permanent" => Some(QuotaTier::Permanent),
            _ => None,
        }
    }

    /// 流水描述中使用的名称
    pub fn label(&self) -> &'static str {
        match self {
            QuotaTier::Daily => "日",
            QuotaTier::Monthly => "月",
            QuotaTier::Permanent => "永久",
        }
    }
}

/// 消耗配额的服务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// AI 对话
    Chat,
    /// 题目生成
    Generate,
    /// 批改
    Grade,
    /// 学情诊断
    Diagnose,
    /// 图片识别
    Ocr,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Chat => "chat",
            ServiceType::Generate => "generate",
            ServiceType::Grade => "grade",
            ServiceType::Diagnose => "diagnose",
            ServiceType::Ocr => "ocr",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chat" => Some(ServiceType::Chat),
            "generate" => Some(ServiceType::Generate),
            "grade" => Some(ServiceType::Grade),
            "diagnose" => Some(ServiceType::Diagnose),
            "ocr" => Some(ServiceType::Ocr),
            _ => None,
        }
    }
}

/// 充值方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RechargeMethod {
    Manual,
    Purchase,
    Reward,
    Vip,
}

impl RechargeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RechargeMethod::Manual => "manual",
            RechargeMethod::Purchase => "purchase",
            RechargeMethod::Reward => "reward",
            RechargeMethod::Vip => "vip",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(RechargeMethod::Manual),
            "purchase" => Some(RechargeMethod::Purchase),
            "reward" => Some(RechargeMethod::Reward),
            "vip" => Some(RechargeMethod::Vip),
            _ => None,
        }
    }
}

/// 新账户的默认配额
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountDefaults {
    pub daily_quota: i64,
    pub monthly_quota: i64,
    pub permanent_quota: i64,
}

impl Default for AccountDefaults {
    fn default() -> Self {
        Self {
            daily_quota: 10,
            monthly_quota: 300,
            permanent_quota: 0,
        }
    }
}

/// 用户配额账户
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaAccount {
    pub id: i64,
    pub user_id: i64,
    pub daily_quota: i64,
    pub daily_used: i64,
    pub daily_reset_at: DateTime<Utc>,
    pub monthly_quota: i64,
    pub monthly_used: i64,
    pub monthly_reset_at: DateTime<Utc>,
    pub permanent_quota: i64,
    pub is_vip: bool,
    pub vip_expire_at: Option<DateTime<Utc>>,
    pub total_consumed: i64,
    pub last_consume_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuotaAccount {
    /// 未落库账户的默认投影（只读检查使用）
    pub fn projected(
        user_id: i64,
        defaults: AccountDefaults,
        now: DateTime<Utc>,
        tz: Tz,
    ) -> Self {
        Self {
            id: 0,
            user_id,
            daily_quota: defaults.daily_quota,
            daily_used: 0,
            daily_reset_at: next_day_boundary(now, tz),
            monthly_quota: defaults.monthly_quota,
            monthly_used: 0,
            monthly_reset_at: next_month_boundary(now, tz),
            permanent_quota: defaults.permanent_quota,
            is_vip: false,
            vip_expire_at: None,
            total_consumed: 0,
            last_consume_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn daily_remaining(&self) -> i64 {
        (self.daily_quota - self.daily_used).max(0)
    }

    pub fn monthly_remaining(&self) -> i64 {
        (self.monthly_quota - self.monthly_used).max(0)
    }

    /// 永久 + 月剩余 + 日剩余
    pub fn total_available(&self) -> i64 {
        self.permanent_quota
            .saturating_add(self.monthly_remaining())
            .saturating_add(self.daily_remaining())
    }

    /// 充值后各类配额上限及其总和仍在 i64 范围内
    pub fn can_add(&self, tier: QuotaTier, amount: i64) -> bool {
        let (mut daily, mut monthly, mut permanent) =
            (self.daily_quota, self.monthly_quota, self.permanent_quota);
        let slot = match tier {
            QuotaTier::Daily => &mut daily,
            QuotaTier::Monthly => &mut monthly,
            QuotaTier::Permanent => &mut permanent,
        };
        match slot.checked_add(amount) {
            Some(v) => *slot = v,
            None => return false,
        }
        permanent
            .checked_add(monthly)
            .and_then(|v| v.checked_add(daily))
            .is_some()
    }

    pub fn needs_daily_reset(&self, now: DateTime<Utc>) -> bool {
        now >= self.daily_reset_at
    }

    pub fn needs_monthly_reset(&self, now: DateTime<Utc>) -> bool {
        now >= self.monthly_reset_at
    }

    /// 在内存中应用到期的重置，不写库
    pub fn apply_due_resets(&mut self, now: DateTime<Utc>, tz: Tz) {
        if self.needs_daily_reset(now) {
            self.daily_used = 0;
            self.daily_reset_at = next_day_boundary(now, tz);
        }
        if self.needs_monthly_reset(now) {
            self.monthly_used = 0;
            self.monthly_reset_at = next_month_boundary(now, tz);
        }
    }

    fn remaining(&self, tier: QuotaTier) -> i64 {
        match tier {
            QuotaTier::Permanent => self.permanent_quota,
            QuotaTier::Monthly => self.monthly_remaining(),
            QuotaTier::Daily => self.daily_remaining(),
        }
    }

    /// 按 永久 → 月 → 日 的顺序贪心分配，余额不足返回 None
    pub fn plan_draws(&self, amount: i64) -> Option<Vec<TierDraw>> {
        if amount <= 0 || self.total_available() < amount {
            return None;
        }

        let mut left = amount;
        let mut draws = Vec::new();
        for tier in QuotaTier::DRAW_ORDER {
            if left == 0 {
                break;
            }
            let take = self.remaining(tier).min(left);
            if take > 0 {
                draws.push(TierDraw { tier, amount: take });
                left -= take;
            }
        }
        Some(draws)
    }

    /// 在内存中应用扣减
    pub fn apply_draws(&mut self, draws: &[TierDraw], now: DateTime<Utc>) {
        for draw in draws {
            match draw.tier {
                QuotaTier::Permanent => self.permanent_quota -= draw.amount,
                QuotaTier::Monthly => self.monthly_used += draw.amount,
                QuotaTier::Daily => self.daily_used += draw.amount,
            }
            self.total_consumed += draw.amount;
        }
        self.last_consume_at = Some(now);
        self.updated_at = now;
    }

    pub fn to_info(&self) -> QuotaInfo {
        QuotaInfo {
            user_id: self.user_id,
            daily_quota: self.daily_quota,
            daily_used: self.daily_used,
            daily_remaining: self.daily_remaining(),
            daily_reset_at: self.daily_reset_at,
            monthly_quota: self.monthly_quota,
            monthly_used: self.monthly_used,
            monthly_remaining: self.monthly_remaining(),
            monthly_reset_at: self.monthly_reset_at,
            permanent_quota: self.permanent_quota,
            total_available: self.total_available(),
            is_vip: self.is_vip,
            vip_expire_at: self.vip_expire_at,
            total_consumed: self.total_consumed,
            last_consume_at: self.last_consume_at,
        }
    }
}

/// 配额信息（读模型）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaInfo {
    pub user_id: i64,
    pub daily_quota: i64,
    pub daily_used: i64,
    pub daily_remaining: i64,
    pub daily_reset_at: DateTime<Utc>,
    pub monthly_quota: i64,
    pub monthly_used: i64,
    pub monthly_remaining: i64,
    pub monthly_reset_at: DateTime<Utc>,
    pub permanent_quota: i64,
    pub total_available: i64,
    pub is_vip: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vip_expire_at: Option<DateTime<Utc>>,
    pub total_consumed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_consume_at: Option<DateTime<Utc>>,
}

/// 单个配额类型上的扣减量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierDraw {
    pub tier: QuotaTier,
    pub amount: i64,
}

/// 扣减结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeReceipt {
    pub draws: Vec<TierDraw>,
    pub info: QuotaInfo,
}

/// 只读检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCheck {
    pub sufficient: bool,
    pub required: i64,
    pub available: i64,
}

/// 请求元数据，写入消费流水
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub request_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    /// 生成新的请求 ID
    pub fn generated() -> Self {
        Self {
            request_id: Some(uuid::Uuid::new_v4().to_string()),
            ..Default::default()
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// 充值请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RechargeRequest {
    pub user_id: i64,
    pub tier: QuotaTier,
    pub amount: i64,
    pub reason: String,
    pub operator_id: Option<i64>,
    pub method: RechargeMethod,
    pub order_id: Option<String>,
}

impl RechargeRequest {
    pub fn manual(
        user_id: i64,
        tier: QuotaTier,
        amount: i64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            tier,
            amount,
            reason: reason.into(),
            operator_id: None,
            method: RechargeMethod::Manual,
            order_id: None,
        }
    }

    pub fn with_operator(mut self, operator_id: i64) -> Self {
        self.operator_id = Some(operator_id);
        self
    }

    pub fn with_method(mut self, method: RechargeMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }
}

/// 消费流水
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaLedgerEntry {
    pub id: i64,
    pub user_id: i64,
    pub tier: QuotaTier,
    pub amount: i64,
    pub service_type: ServiceType,
    pub description: Option<String>,
    pub request_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 充值流水
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RechargeLedgerEntry {
    pub id: i64,
    pub user_id: i64,
    pub tier: QuotaTier,
    pub amount: i64,
    pub reason: Option<String>,
    pub operator_id: Option<i64>,
    pub method: RechargeMethod,
    pub order_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 消费流水描述：单一类型 `使用永久配额 N`，组合使用 `组合使用永久配额 N`
pub fn draw_description(draw: &TierDraw, combined: bool) -> String {
    let prefix = if combined { "组合使用" } else { "使用" };
    format!("{}{}配额 {}", prefix, draw.tier.label(), draw.amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Asia::Shanghai;

    fn account(permanent: i64, monthly_left: i64, daily_left: i64) -> QuotaAccount {
        let now = Utc::now();
        let mut account = QuotaAccount::projected(1, AccountDefaults::default(), now, Shanghai);
        account.permanent_quota = permanent;
        account.monthly_quota = 300;
        account.monthly_used = 300 - monthly_left;
        account.daily_quota = 10;
        account.daily_used = 10 - daily_left;
        account
    }

    #[test]
    fn test_greedy_tier_order() {
        let account = account(5, 10, 3);
        assert_eq!(account.total_available(), 18);

        let draws = account.plan_draws(7).unwrap();
        assert_eq!(
            draws,
            vec![
                TierDraw {
                    tier: QuotaTier::Permanent,
                    amount: 5
                },
                TierDraw {
                    tier: QuotaTier::Monthly,
                    amount: 2
                },
            ]
        );
    }

    #[test]
    fn test_draws_span_all_tiers() {
        let mut account = account(1, 2, 3);
        let draws = account.plan_draws(6).unwrap();
        assert_eq!(draws.len(), 3);
        assert_eq!(draws.iter().map(|d| d.amount).sum::<i64>(), 6);

        let now = Utc::now();
        account.apply_draws(&draws, now);
        assert_eq!(account.permanent_quota, 0);
        assert_eq!(account.monthly_remaining(), 0);
        assert_eq!(account.daily_remaining(), 0);
        assert_eq!(account.total_consumed, 6);
        assert_eq!(account.last_consume_at, Some(now));
    }

    #[test]
    fn test_insufficient_and_invalid_amount() {
        let account = account(1, 1, 1);
        assert!(account.plan_draws(4).is_none());
        assert!(account.plan_draws(0).is_none());
        assert!(account.plan_draws(-1).is_none());
        assert!(account.plan_draws(3).is_some());
    }

    #[test]
    fn test_remaining_never_negative() {
        let mut account = account(0, 0, 0);
        account.daily_used = 20;
        assert_eq!(account.daily_remaining(), 0);
    }

    #[test]
    fn test_total_available_saturates() {
        let account = account(i64::MAX, 10, 3);
        assert_eq!(account.total_available(), i64::MAX);
        assert!(account.plan_draws(i64::MAX).is_some());
    }

    #[test]
    fn test_can_add_rejects_overflowing_ceiling() {
        let account = account(0, 300, 10);
        assert!(account.can_add(QuotaTier::Permanent, 1_000));
        assert!(!account.can_add(QuotaTier::Permanent, i64::MAX));
        assert!(!account.can_add(QuotaTier::Daily, i64::MAX - 5));
        assert!(account.can_add(QuotaTier::Monthly, i64::MAX - 310));
        assert!(!account.can_add(QuotaTier::Monthly, i64::MAX - 309));
    }

    #[test]
    fn test_apply_due_resets() {
        let created = Shanghai
            .with_ymd_and_hms(2026, 1, 31, 12, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let mut account =
            QuotaAccount::projected(1, AccountDefaults::default(), created, Shanghai);
        account.daily_used = 10;
        account.monthly_used = 100;

        // 同一天内不重置
        account.apply_due_resets(created, Shanghai);
        assert_eq!(account.daily_used, 10);

        let next_day = Shanghai
            .with_ymd_and_hms(2026, 2, 1, 0, 0, 1)
            .unwrap()
            .with_timezone(&Utc);
        account.apply_due_resets(next_day, Shanghai);
        assert_eq!(account.daily_used, 0);
        assert_eq!(account.monthly_used, 0);
        assert!(account.daily_reset_at > next_day);
        assert!(account.monthly_reset_at > next_day);

        // 再次应用不产生变化
        let snapshot = account.clone();
        account.apply_due_resets(next_day, Shanghai);
        assert_eq!(account, snapshot);
    }

    #[test]
    fn test_draw_description() {
        let draw = TierDraw {
            tier: QuotaTier::Permanent,
            amount: 5,
        };
        assert_eq!(draw_description(&draw, false), "使用永久配额 5");
        assert_eq!(draw_description(&draw, true), "组合使用永久配额 5");

        let daily = TierDraw {
            tier: QuotaTier::Daily,
            amount: 2,
        };
        assert_eq!(draw_description(&daily, true), "组合使用日配额 2");
    }

    #[test]
    fn test_enum_strings() {
        for tier in QuotaTier::DRAW_ORDER {
            assert_eq!(QuotaTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(ServiceType::parse("ocr"), Some(ServiceType::Ocr));
        assert_eq!(ServiceType::parse("unknown"), None);
        assert_eq!(RechargeMethod::parse("vip"), Some(RechargeMethod::Vip));
        assert_eq!(
            serde_json::to_string(&QuotaTier::Permanent).unwrap(),
            "\"permanent\""
        );
    }
}
