//! 数据库句柄
//!
//! 每次操作打开独立的 SQLite 连接，并发控制完全交给存储引擎：
//! 写操作使用 `BEGIN IMMEDIATE` 事务获取写锁，等同于
//! 可串行化隔离下的 `SELECT ... FOR UPDATE`。多个进程/实例共享同一个
//! 数据库文件时同样成立，因此这里不使用任何进程内互斥锁。

pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreResult;

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// 数据库文件路径
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// 等待写锁的最长时间（毫秒）
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_path() -> PathBuf {
    PathBuf::from("data/vault.db")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// SQLite 数据库句柄
///
/// 可廉价克隆，所有克隆指向同一个数据库文件。
#[derive(Debug, Clone)]
pub struct Database {
    path: Arc<PathBuf>,
    busy_timeout: Duration,
}

impl Database {
    /// 打开数据库：切换到 WAL 模式并创建缺失的表
    pub fn open(config: &DatabaseConfig) -> StoreResult<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                // 创建失败时由随后的 SQLite 打开报告错误
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!("[Database] 创建目录 {} 失败: {}", parent.display(), e);
                }
            }
        }

        let db = Self {
            path: Arc::new(config.path.clone()),
            busy_timeout: config.busy_timeout(),
        };

        let conn = db.connect()?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        schema::create_tables(&conn)?;

        info!(
            "[Database] 已打开 {}，journal_mode={}",
            db.path.display(),
            mode
        );
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 打开一个新连接
    pub fn connect(&self) -> StoreResult<Connection> {
        let conn = Connection::open(self.path.as_ref())?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        debug!("[Database] 新建连接 {}", self.path.display());
        Ok(conn)
    }

    /// 开启写事务并立即获取写锁
    ///
    /// 锁在事务提交或回滚（drop）时释放；等待超过 busy_timeout 返回
    /// `StoreError::LockTimeout`。
    pub fn begin_immediate(conn: &mut Connection) -> StoreResult<Transaction<'_>> {
        Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
    }
}

/// 在保存点内执行写入
///
/// 闭包失败时只回滚保存点内的写入，外层事务保持可提交。
pub fn in_savepoint<T>(
    tx: &mut Transaction<'_>,
    f: impl FnOnce(&Connection) -> StoreResult<T>,
) -> StoreResult<T> {
    let sp = tx.savepoint()?;
    let value = f(&sp)?;
    sp.commit()?;
    Ok(value)
}
