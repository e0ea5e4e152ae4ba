//! 配额定时任务
//!
//! 按 cron 表达式（含秒字段，在配置时区下解释）触发日配额重置、
//! 月配额重置和 VIP 过期处理。每个任务一个 tokio 任务，
//! 收到取消信号后退出。

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ScheduleConfig;
use crate::error::{QuotaError, QuotaResult};
use crate::service::QuotaService;

/// 定时清理任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepJob {
    DailyReset,
    MonthlyReset,
    VipExpiry,
}

impl SweepJob {
    pub const ALL: [SweepJob; 3] = [
        SweepJob::DailyReset,
        SweepJob::MonthlyReset,
        SweepJob::VipExpiry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SweepJob::DailyReset => "daily_reset",
            SweepJob::MonthlyReset => "monthly_reset",
            SweepJob::VipExpiry => "vip_expiry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily_reset" | "daily" => Some(SweepJob::DailyReset),
            "monthly_reset" | "monthly" => Some(SweepJob::MonthlyReset),
            "vip_expiry" | "vip" => Some(SweepJob::VipExpiry),
            _ => None,
        }
    }

    /// 立即执行一次，返回影响的账户数
    pub async fn run(&self, service: &QuotaService) -> QuotaResult<usize> {
        match self {
            SweepJob::DailyReset => service.reset_daily_quotas().await,
            SweepJob::MonthlyReset => service.reset_monthly_quotas().await,
            SweepJob::VipExpiry => service.process_expired_vips().await,
        }
    }
}

fn parse_schedule(job: SweepJob, expr: &str) -> QuotaResult<Schedule> {
    Schedule::from_str(expr)
        .map_err(|e| QuotaError::InvalidSchedule(format!("{} '{}': {}", job.as_str(), expr, e)))
}

pub struct QuotaScheduler {
    service: QuotaService,
    jobs: Vec<(SweepJob, Schedule)>,
}

impl QuotaScheduler {
    /// 解析所有 cron 表达式，任一无效即返回错误
    pub fn new(service: QuotaService, config: &ScheduleConfig) -> QuotaResult<Self> {
        let jobs = vec![
            (
                SweepJob::DailyReset,
                parse_schedule(SweepJob::DailyReset, &config.daily_reset)?,
            ),
            (
                SweepJob::MonthlyReset,
                parse_schedule(SweepJob::MonthlyReset, &config.monthly_reset)?,
            ),
            (
                SweepJob::VipExpiry,
                parse_schedule(SweepJob::VipExpiry, &config.vip_expiry)?,
            ),
        ];
        Ok(Self { service, jobs })
    }

    /// 计算任务在 `after` 之后的下一次触发时间
    pub fn next_fire(&self, job: SweepJob, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let tz = self.service.timezone();
        self.jobs
            .iter()
            .find(|(j, _)| *j == job)
            .and_then(|(_, schedule)| next_after(schedule, tz, after))
    }

    /// 启动所有任务
    pub fn start(self, shutdown: CancellationToken) -> SchedulerHandle {
        let tz = self.service.timezone();
        let mut tasks = Vec::with_capacity(self.jobs.len());
        for (job, schedule) in self.jobs {
            info!(
                "[QuotaScheduler] 启动任务 {}，下次执行 {:?}",
                job.as_str(),
                next_after(&schedule, tz, Utc::now())
            );
            tasks.push(tokio::spawn(run_job(
                self.service.clone(),
                job,
                schedule,
                shutdown.clone(),
            )));
        }
        SchedulerHandle { shutdown, tasks }
    }
}

fn next_after(schedule: &Schedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|dt| dt.with_timezone(&Utc))
}

async fn run_job(
    service: QuotaService,
    job: SweepJob,
    schedule: Schedule,
    shutdown: CancellationToken,
) {
    let tz = service.timezone();
    loop {
        let now = Utc::now();
        let Some(next) = next_after(&schedule, tz, now) else {
            warn!("[QuotaScheduler] 任务 {} 没有后续触发时间", job.as_str());
            break;
        };
        let wait = (next - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        match job.run(&service).await {
            Ok(count) => info!(
                "[QuotaScheduler] 任务 {} 执行完成，影响 {} 个账户",
                job.as_str(),
                count
            ),
            Err(e) => error!("[QuotaScheduler] 任务 {} 执行失败: {}", job.as_str(), e),
        }
    }
    info!("[QuotaScheduler] 任务 {} 已停止", job.as_str());
}

/// 运行中的定时任务
pub struct SchedulerHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_finished())
    }

    /// 发送取消信号并等待所有任务退出
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("[QuotaScheduler] 任务异常退出: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountDefaults;
    use bblearning_core::{Database, DatabaseConfig};
    use chrono::TimeZone;
    use chrono_tz::Asia::Shanghai;

    fn service(dir: &tempfile::TempDir) -> QuotaService {
        let db = Database::open(&DatabaseConfig {
            path: dir.path().join("vault.db"),
            ..Default::default()
        })
        .unwrap();
        QuotaService::new(db, AccountDefaults::default(), Shanghai)
    }

    fn shanghai(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Shanghai
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_next_fire_uses_local_timezone() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = QuotaScheduler::new(service(&dir), &ScheduleConfig::default()).unwrap();
        let now = shanghai(2026, 3, 5, 12, 3);

        assert_eq!(
            scheduler.next_fire(SweepJob::DailyReset, now),
            Some(shanghai(2026, 3, 6, 0, 0))
        );
        assert_eq!(
            scheduler.next_fire(SweepJob::MonthlyReset, now),
            Some(shanghai(2026, 4, 1, 0, 0))
        );
        assert_eq!(
            scheduler.next_fire(SweepJob::VipExpiry, now),
            Some(shanghai(2026, 3, 5, 12, 10))
        );
    }

    #[test]
    fn test_invalid_expression_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScheduleConfig {
            monthly_reset: "every month".to_string(),
            ..Default::default()
        };
        let result = QuotaScheduler::new(service(&dir), &config);
        assert!(matches!(result, Err(QuotaError::InvalidSchedule(_))));
    }

    #[test]
    fn test_job_names() {
        for job in SweepJob::ALL {
            assert_eq!(SweepJob::parse(job.as_str()), Some(job));
        }
        assert_eq!(SweepJob::parse("vip"), Some(SweepJob::VipExpiry));
        assert_eq!(SweepJob::parse("weekly"), None);
    }

    #[tokio::test]
    async fn test_run_once() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir);
        for job in SweepJob::ALL {
            assert_eq!(job.run(&service).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = QuotaScheduler::new(service(&dir), &ScheduleConfig::default()).unwrap();
        let handle = scheduler.start(CancellationToken::new());
        assert!(handle.is_running());
        handle.shutdown().await;
    }
}
