use std::time::Duration;

use chrono::{DateTime, Utc};
use stats_core::calendar;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// 定时器发往运行循环的触发消息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// 脏坐席增量聚合
    DirtyInterval,
    /// 每日全量聚合
    MainAggregation,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::DirtyInterval => "dirty_interval",
            Trigger::MainAggregation => "main_aggregation",
        }
    }
}

/// 每隔 `period` 发送一次 [`Trigger::DirtyInterval`]，第一次在一个周期之后
pub fn spawn_dirty_timer(
    period: Duration,
    tx: mpsc::Sender<Trigger>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("脏坐席定时器已启动，周期 {:?}", period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if tx.send(Trigger::DirtyInterval).await.is_err() {
                        break;
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("脏坐席定时器收到停止信号");
                    break;
                }
            }
        }
    })
}

/// 在 `first_fire` 发送 [`Trigger::MainAggregation`]，之后每天同一北京整点重复
///
/// 每次触发后无论运行结果如何都会计算下一次触发时间并通过 `on_rearm` 通知。
pub fn spawn_main_timer<F>(
    hour: u32,
    first_fire: DateTime<Utc>,
    tx: mpsc::Sender<Trigger>,
    mut shutdown_rx: broadcast::Receiver<()>,
    on_rearm: F,
) -> JoinHandle<()>
where
    F: Fn(DateTime<Utc>) + Send + 'static,
{
    tokio::spawn(async move {
        let mut next_fire = first_fire;
        debug!("全量聚合定时器已启动，下次触发 {}", next_fire);

        loop {
            let wait = (next_fire - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = sleep(wait) => {
                    if tx.send(Trigger::MainAggregation).await.is_err() {
                        break;
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("全量聚合定时器收到停止信号");
                    break;
                }
            }

            next_fire = match calendar::next_hour_occurrence(hour, next_fire) {
                Ok(next) => next,
                Err(e) => {
                    error!("计算下次全量聚合时间失败: {}", e);
                    break;
                }
            };
            debug!("全量聚合定时器重新设定为 {}", next_fire);
            on_rearm(next_fire);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn test_dirty_timer_fires_each_period() {
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let started = Instant::now();
        let handle = spawn_dirty_timer(Duration::from_secs(60), tx, shutdown_rx);

        assert_eq!(rx.recv().await, Some(Trigger::DirtyInterval));
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(rx.recv().await, Some(Trigger::DirtyInterval));
        assert!(started.elapsed() >= Duration::from_secs(120));

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_main_timer_rearms_next_day() {
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let rearmed = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&rearmed);

        let first_fire = calendar::next_hour_occurrence(2, Utc::now()).unwrap();
        let handle = spawn_main_timer(2, first_fire, tx, shutdown_rx, move |next| {
            recorder.lock().unwrap().push(next);
        });

        assert_eq!(rx.recv().await, Some(Trigger::MainAggregation));
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        let rearmed = rearmed.lock().unwrap();
        assert_eq!(rearmed.first(), Some(&(first_fire + chrono::Duration::days(1))));
        assert_eq!(calendar::to_beijing_naive(rearmed[0]).hour(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_stop_on_shutdown() {
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, _) = broadcast::channel(1);
        let dirty = spawn_dirty_timer(
            Duration::from_secs(3600),
            tx.clone(),
            shutdown_tx.subscribe(),
        );
        let main = spawn_main_timer(
            3,
            Utc::now() + chrono::Duration::hours(5),
            tx,
            shutdown_tx.subscribe(),
            |_| {},
        );

        shutdown_tx.send(()).unwrap();
        dirty.await.unwrap();
        main.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }
}
