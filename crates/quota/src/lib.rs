//! 配额计量 crate
//!
//! 管理每个用户的日/月/永久三类 AI 调用配额，提供原子扣减、
//! 充值、VIP 管理、惰性与批量重置，以及消费/充值流水。
//!
//! ## 模块结构
//!
//! - `service` - 配额服务与 `QuotaGate` 接口
//! - `scheduler` - 基于 cron 的重置与 VIP 过期任务
//! - `dao` - 账户表与流水表的数据访问
//! - `types` - 账户、读模型、流水与请求类型

mod config;
pub mod dao;
mod error;
mod scheduler;
mod service;
mod types;

pub use config::{QuotaConfig, ScheduleConfig};
pub use error::{QuotaError, QuotaResult};
pub use scheduler::{QuotaScheduler, SchedulerHandle, SweepJob};
pub use service::{QuotaGate, QuotaService, VIP_GRANT_REASON};
pub use types::{
    draw_description, AccountDefaults, ConsumeReceipt, QuotaAccount, QuotaCheck, QuotaInfo,
    QuotaLedgerEntry, QuotaTier, RechargeLedgerEntry, RechargeMethod, RechargeRequest,
    RequestMeta, ServiceType, TierDraw,
};
