//! Test helper utilities

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use stats_core::calendar;
use tokio::time::{sleep, Instant};

/// 北京时间的某一时刻
pub fn beijing(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    let local = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .expect("invalid Beijing test time");
    calendar::from_beijing_naive(local)
}

/// `prefix1..=prefixN`
pub fn agent_ids(prefix: &str, count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{prefix}{i}")).collect()
}

/// Wait for a condition to be true with timeout
///
/// Uses tokio's clock so it also works under `start_paused = true`.
pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();

    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }

    condition().await
}
