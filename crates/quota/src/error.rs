use bblearning_core::StoreError;

/// 配额服务错误
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("无效的配额数量: {0}")]
    InvalidAmount(i64),

    #[error("配额不足: 需要{required}，可用{available}")]
    InsufficientQuota { required: i64, available: i64 },

    #[error("VIP 到期时间必须晚于当前时间")]
    InvalidVipExpiry,

    #[error("配额账户不存在或已注销: user_id={0}")]
    AccountNotFound(i64),

    #[error("无效的定时表达式: {0}")]
    InvalidSchedule(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("后台任务失败: {0}")]
    TaskFailed(String),
}

pub type QuotaResult<T> = Result<T, QuotaError>;
