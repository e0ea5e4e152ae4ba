use serde::{Deserialize, Serialize};

use crate::types::AccountDefaults;

/// 配额服务配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaConfig {
    /// 新账户日配额
    #[serde(default = "default_daily_quota")]
    pub default_daily_quota: i64,
    /// 新账户月配额
    #[serde(default = "default_monthly_quota")]
    pub default_monthly_quota: i64,
    /// 新账户永久配额
    #[serde(default)]
    pub default_permanent_quota: i64,
    /// 计算重置边界使用的时区（IANA 名称）
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// 定时任务
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

fn default_daily_quota() -> i64 {
    10
}
fn default_monthly_quota() -> i64 {
    300
}
fn default_timezone() -> String {
    "Asia/Shanghai".to_string()
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_daily_quota: default_daily_quota(),
            default_monthly_quota: default_monthly_quota(),
            default_permanent_quota: 0,
            timezone: default_timezone(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl QuotaConfig {
    pub fn account_defaults(&self) -> AccountDefaults {
        AccountDefaults {
            daily_quota: self.default_daily_quota,
            monthly_quota: self.default_monthly_quota,
            permanent_quota: self.default_permanent_quota,
        }
    }
}

/// 定时任务配置（cron 表达式，含秒字段）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 日配额重置
    #[serde(default = "default_daily_reset")]
    pub daily_reset: String,
    /// 月配额重置
    #[serde(default = "default_monthly_reset")]
    pub monthly_reset: String,
    /// VIP 过期处理
    #[serde(default = "default_vip_expiry")]
    pub vip_expiry: String,
}

fn default_enabled() -> bool {
    true
}
fn default_daily_reset() -> String {
    "0 0 0 * * *".to_string()
}
fn default_monthly_reset() -> String {
    "0 0 0 1 * *".to_string()
}
fn default_vip_expiry() -> String {
    "0 */10 * * * *".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            daily_reset: default_daily_reset(),
            monthly_reset: default_monthly_reset(),
            vip_expiry: default_vip_expiry(),
        }
    }
}
