//! 存储层错误

use rusqlite::ErrorCode;

/// 存储层错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("数据库错误: {0}")]
    Sqlite(rusqlite::Error),

    /// 等待行锁/写锁超过 busy_timeout
    #[error("等待数据库锁超时")]
    LockTimeout,

    #[error("并发更新冲突: {0}")]
    ConcurrentUpdateConflict(String),

    #[error("数据行格式错误: {0}")]
    CorruptRow(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                StoreError::LockTimeout
            }
            _ => StoreError::Sqlite(e),
        }
    }
}

impl StoreError {
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, StoreError::LockTimeout)
    }
}
