//! 北京时间日历
//!
//! 统计按北京时间（固定 UTC+8，无夏令时）的自然日分桶，与进程本地时区和 UTC 无关。
//! 本模块只包含纯函数。

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::errors::{StatsError, StatsResult};

/// 北京时间相对 UTC 的偏移（小时）
pub const BEIJING_UTC_OFFSET_HOURS: i64 = 8;

/// 日期键格式
pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// 将UTC时刻转换为北京本地的墙上时间
pub fn to_beijing_naive(instant: DateTime<Utc>) -> NaiveDateTime {
    instant.naive_utc() + Duration::hours(BEIJING_UTC_OFFSET_HOURS)
}

/// 将北京本地墙上时间转换回UTC时刻
pub fn from_beijing_naive(local: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&(local - Duration::hours(BEIJING_UTC_OFFSET_HOURS)))
}

/// 时刻所在的北京自然日
pub fn bucket_date(instant: DateTime<Utc>) -> NaiveDate {
    to_beijing_naive(instant).date()
}

/// 北京自然日零点对应的UTC时刻
pub fn beijing_midnight(date: NaiveDate) -> DateTime<Utc> {
    from_beijing_naive(date.and_time(NaiveTime::MIN))
}

/// 返回包含该时刻的北京自然日范围 `[00:00:00.000, 23:59:59.999]`
pub fn day_bounds(instant: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = beijing_midnight(bucket_date(instant));
    let end = start + Duration::days(1) - Duration::milliseconds(1);
    (start, end)
}

/// 北京日期键 `YYYY-MM-DD`
pub fn date_key(instant: DateTime<Utc>) -> String {
    bucket_date(instant).format(DATE_KEY_FORMAT).to_string()
}

/// 解析严格的 `YYYY-MM-DD` 日期键
pub fn parse_bucket_date(key: &str) -> StatsResult<NaiveDate> {
    let bytes = key.as_bytes();
    let well_formed = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !well_formed {
        return Err(StatsError::invalid_date(key));
    }

    NaiveDate::parse_from_str(key, DATE_KEY_FORMAT).map_err(|_| StatsError::invalid_date(key))
}

/// 日期键对应的北京零点时刻
pub fn parse_date_key(key: &str) -> StatsResult<DateTime<Utc>> {
    parse_bucket_date(key).map(beijing_midnight)
}

/// 计算严格晚于 `from` 的下一个北京时间 `hour:00:00`
///
/// 如果 `from` 恰好就是该整点，返回一天之后的同一时刻，保证定时器总是向前推进。
pub fn next_hour_occurrence(hour: u32, from: DateTime<Utc>) -> StatsResult<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(hour, 0, 0)
        .ok_or_else(|| StatsError::config_error(format!("无效的小时: {hour}，取值范围 0-23")))?;

    let local_now = to_beijing_naive(from);
    let mut candidate = local_now.date().and_time(time);
    if candidate <= local_now {
        candidate = candidate + Duration::days(1);
    }

    Ok(from_beijing_naive(candidate))
}
