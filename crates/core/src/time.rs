//! 时间工具
//!
//! 数据库中的时间统一存储为 Unix 毫秒（INTEGER），
//! 日/月重置边界按配置的时区计算本地零点。

use chrono::{DateTime, Datelike, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

pub fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub fn opt_from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(from_millis)
}

/// 本地日期零点对应的 UTC 时刻
///
/// 夏令时跳变导致零点不存在时，取该日期第一个合法的整点。
fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    for hour in 0..24 {
        let Some(naive) = date.and_hms_opt(hour, 0, 0) else {
            continue;
        };
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => return dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => continue,
        }
    }
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

/// 下一个日重置时刻（`now` 所在本地日期的次日零点）
pub fn next_day_boundary(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let today = now.with_timezone(&tz).date_naive();
    let tomorrow = today.succ_opt().unwrap_or(today);
    local_midnight(tomorrow, tz)
}

/// 下一个月重置时刻（次月 1 日本地零点）
pub fn next_month_boundary(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);
    let (year, month) = if local.month() == 12 {
        (local.year() + 1, 1)
    } else {
        (local.year(), local.month() + 1)
    };
    let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_else(|| local.date_naive());
    local_midnight(first, tz)
}
