//! 解密结果缓存
//!
//! 以 `provider:key_name` 为键缓存明文，条目在 TTL 到期后失效。
//! 每个键维护一个代数：失效时代数加一，缓存未命中期间读到的明文
//! 只有在代数未变化时才会写回，避免失效后被旧值重新填充。

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zeroize::Zeroizing;

struct CachedPlaintext {
    plaintext: Zeroizing<String>,
    expires_at: Instant,
}

pub struct DecryptCache {
    entries: DashMap<String, CachedPlaintext>,
    /// 键的失效代数。删除密钥后也保留：移除会让删除前发起的未命中
    /// 读到代数 0 并写回已删除的明文。条目数以出现过的键数为上限。
    generations: DashMap<String, u64>,
    ttl: Duration,
}

impl DecryptCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            generations: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 读取未过期的明文
    pub fn get(&self, key: &str) -> Option<Zeroizing<String>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if now < entry.expires_at {
                return Some(entry.plaintext.clone());
            }
        }
        // 读锁已释放
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    /// 当前代数，未命中时在读取数据库前获取
    pub fn generation(&self, key: &str) -> u64 {
        self.generations.get(key).map(|g| *g).unwrap_or(0)
    }

    /// 代数未变化时写入，返回是否写入
    pub fn insert_if_current(
        &self,
        key: &str,
        generation: u64,
        plaintext: Zeroizing<String>,
    ) -> bool {
        // 持有代数分片锁直到写入完成，与 invalidate 互斥
        let current = self.generations.entry(key.to_string()).or_insert(0);
        if *current != generation {
            debug!("[DecryptCache] 代数已变化，跳过写入 {}", key);
            return false;
        }
        self.entries.insert(
            key.to_string(),
            CachedPlaintext {
                plaintext,
                expires_at: Instant::now() + self.ttl,
            },
        );
        true
    }

    /// 使缓存条目失效
    pub fn invalidate(&self, key: &str) {
        let mut current = self.generations.entry(key.to_string()).or_insert(0);
        *current += 1;
        self.entries.remove(key);
        debug!("[DecryptCache] 已失效 {}", key);
    }

    /// 清理过期条目，返回清理数量
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 启动定时清理任务，直到 token 被取消
pub fn start_cleanup_task(
    cache: Arc<DecryptCache>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = cache.cleanup();
                    if removed > 0 {
                        debug!("[DecryptCache] 清理过期条目 {} 个", removed);
                    }
                }
            }
        }
    })
}
