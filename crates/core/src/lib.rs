//! 凭证保险库与配额引擎的公共基础 crate
//!
//! ## 模块结构
//!
//! - `database` - SQLite 连接句柄、事务与表结构
//! - `error` - 存储层错误分类
//! - `page` - 分页参数与带告警的返回值
//! - `time` - 时间戳转换与日/月重置边界计算

pub mod database;
mod error;
mod page;
pub mod time;

pub use database::{in_savepoint, Database, DatabaseConfig};
pub use error::{StoreError, StoreResult};
pub use page::{Page, PageRequest, WithWarnings};
