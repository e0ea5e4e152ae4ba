use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 凭证服务配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialConfig {
    /// 解密缓存 TTL（秒）
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// 过期缓存清理间隔（秒）
    #[serde(default = "default_cache_cleanup_secs")]
    pub cache_cleanup_secs: u64,
    /// 使用计数队列容量
    #[serde(default = "default_usage_queue_capacity")]
    pub usage_queue_capacity: usize,
    /// 是否为每次使用写审计日志
    #[serde(default)]
    pub audit_usage: bool,
}

fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_cache_cleanup_secs() -> u64 {
    60
}
fn default_usage_queue_capacity() -> usize {
    1024
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_cleanup_secs: default_cache_cleanup_secs(),
            usage_queue_capacity: default_usage_queue_capacity(),
            audit_usage: false,
        }
    }
}

impl CredentialConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cache_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cache_cleanup_secs.max(1))
    }
}
