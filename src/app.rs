use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use stats_core::{AppConfig, RunResult};
use stats_dispatcher::StatsScheduler;
use stats_infrastructure::{DatabaseManager, DirtySet, MetricsCollector, SqliteStatsRepository};
use stats_worker::AggregationWorker;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

/// 关闭时等待进行中运行结束的最长时间
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// 主应用程序
///
/// 组装数据库、脏集合、聚合执行器和调度器，调度器以 `Arc` 形式对外提供。
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    repository: Arc<SqliteStatsRepository>,
    scheduler: Arc<StatsScheduler>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化统计聚合服务");

        let database = DatabaseManager::new(&config.database)
            .await
            .with_context(|| format!("连接数据库失败: {}", config.database.url))?;
        database.migrate().await.context("数据库迁移失败")?;

        let repository = Arc::new(database.stats_repository());
        let dirty_set = Arc::new(DirtySet::new());
        let metrics = Arc::new(MetricsCollector::new());
        let worker = AggregationWorker::new(
            repository.clone(),
            Arc::clone(&dirty_set),
            config.scheduler.batch_size,
        );
        let scheduler = Arc::new(StatsScheduler::new(
            config.scheduler.clone(),
            Arc::new(worker),
            dirty_set,
            metrics,
        ));

        Ok(Self {
            config,
            database,
            repository,
            scheduler,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn scheduler(&self) -> Arc<StatsScheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn repository(&self) -> Arc<SqliteStatsRepository> {
        Arc::clone(&self.repository)
    }

    /// 启动调度器直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.scheduler.start().context("启动调度器失败")?;

        let _ = shutdown_rx.recv().await;
        info!("应用收到关闭信号");

        self.scheduler.stop().await;
        if !self.wait_for_idle(DRAIN_TIMEOUT).await {
            warn!("等待进行中的聚合超时，放弃等待");
        }
        self.database.close().await;
        Ok(())
    }

    /// 执行一次运行后返回，不启动定时器
    ///
    /// 指定坐席时只重算该坐席，否则对全部已知坐席做全量重算：
    /// 新进程的脏集合总是空的，增量运行不会有任何效果。
    pub async fn run_once(&self, agent_id: Option<&str>) -> Result<RunResult> {
        let result = match agent_id {
            Some(agent_id) => self.scheduler.trigger_manual(Some(agent_id)).await,
            None => self.scheduler.trigger_full_all().await,
        }
        .context("手动触发聚合失败")?;
        self.database.close().await;
        Ok(result)
    }

    async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.scheduler.get_status().is_running {
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(100)).await;
        }
        true
    }
}
