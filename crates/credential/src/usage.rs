//! 密钥使用计数
//!
//! 解密成功后把密钥 ID 投递到有界队列，由后台任务异步写库。
//! 队列满时直接丢弃，计数只保证至多一次。

use bblearning_core::{Database, StoreResult};
use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::dao::{SecretAuditDao, SecretDao};
use crate::types::NewAuditEntry;

pub struct UsageRecorder {
    tx: mpsc::Sender<i64>,
    worker: JoinHandle<()>,
}

impl UsageRecorder {
    /// 启动后台写入任务，需要在 tokio 运行时内调用
    pub fn start(db: Database, capacity: usize, audit_usage: bool) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run(db, rx, audit_usage));
        Self { tx, worker }
    }

    /// 投递一次使用记录，返回是否入队
    pub fn record(&self, secret_id: i64) -> bool {
        match self.tx.try_send(secret_id) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("[UsageRecorder] 队列已满，丢弃 secret_id={}", secret_id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// 关闭队列并等待已入队记录写完
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            warn!("[UsageRecorder] 后台任务异常退出: {}", e);
        }
    }
}

async fn run(db: Database, mut rx: mpsc::Receiver<i64>, audit_usage: bool) {
    while let Some(secret_id) = rx.recv().await {
        let db = db.clone();
        let result =
            tokio::task::spawn_blocking(move || write_usage(&db, secret_id, audit_usage)).await;

        match result {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => debug!("[UsageRecorder] 密钥已不存在 secret_id={}", secret_id),
            Ok(Err(e)) => warn!("[UsageRecorder] 记录使用失败 secret_id={}: {}", secret_id, e),
            Err(e) => warn!("[UsageRecorder] 写入任务失败: {}", e),
        }
    }
    debug!("[UsageRecorder] 队列已关闭");
}

fn write_usage(db: &Database, secret_id: i64, audit_usage: bool) -> StoreResult<bool> {
    let conn = db.connect()?;
    let now = Utc::now();
    let updated = SecretDao::record_usage(&conn, secret_id, now)?;
    if updated && audit_usage {
        SecretAuditDao::append(&conn, &NewAuditEntry::usage(secret_id, now))?;
    }
    Ok(updated)
}
