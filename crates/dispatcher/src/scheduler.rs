use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use stats_core::{
    calendar, AggregationRunner, RunMode, RunRequest, RunResult, RunTargets, SchedulerConfig,
    SchedulerStatus, StatsError, StatsResult,
};
use stats_infrastructure::{DirtySet, MetricsCollector};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::timers::{spawn_dirty_timer, spawn_main_timer, Trigger};

const TRIGGER_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Default)]
struct SchedulerState {
    is_running: bool,
    started: bool,
    last_run_time: Option<DateTime<Utc>>,
    next_main_aggregation_time: Option<DateTime<Utc>>,
    last_run_result: Option<RunResult>,
}

/// 待开始的运行
enum PendingRun {
    /// 取走脏集合做增量聚合；`skip_if_empty` 时集合为空则不运行
    Dirty { skip_if_empty: bool },
    Full(RunRequest),
}

enum BeginOutcome {
    Started(RunPermit, RunRequest),
    Busy,
    NothingDirty,
}

struct SchedulerInner {
    config: SchedulerConfig,
    runner: Arc<dyn AggregationRunner>,
    dirty_set: Arc<DirtySet>,
    metrics: Arc<MetricsCollector>,
    state: RwLock<SchedulerState>,
}

/// 单飞门控的持有凭证，释放时 `is_running` 回到 false
struct RunPermit {
    inner: Arc<SchedulerInner>,
    released: bool,
}

impl RunPermit {
    fn finish(mut self, result: RunResult) {
        let mut state = self.inner.state_mut();
        state.last_run_result = Some(result);
        state.is_running = false;
        self.released = true;
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        if !self.released {
            self.inner.state_mut().is_running = false;
        }
    }
}

impl SchedulerInner {
    fn state(&self) -> RwLockReadGuard<'_, SchedulerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, SchedulerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 检查门控并在同一临界区内取走脏集合，保证空集合跳过时状态不变
    fn try_begin(self: &Arc<Self>, pending: PendingRun) -> BeginOutcome {
        let mut state = self.state_mut();
        if state.is_running {
            return BeginOutcome::Busy;
        }

        let request = match pending {
            PendingRun::Dirty { skip_if_empty } => {
                let agent_ids = self.dirty_set.drain_all();
                if agent_ids.is_empty() && skip_if_empty {
                    return BeginOutcome::NothingDirty;
                }
                RunRequest::incremental(agent_ids)
            }
            PendingRun::Full(request) => request,
        };

        state.is_running = true;
        state.last_run_time = Some(Utc::now());
        drop(state);

        BeginOutcome::Started(
            RunPermit {
                inner: Arc::clone(self),
                released: false,
            },
            request,
        )
    }

    fn handle_trigger(self: &Arc<Self>, trigger: Trigger) {
        let pending = match trigger {
            Trigger::DirtyInterval => PendingRun::Dirty {
                skip_if_empty: true,
            },
            Trigger::MainAggregation => PendingRun::Full(RunRequest::full_all()),
        };

        match self.try_begin(pending) {
            BeginOutcome::Started(permit, request) => {
                info!("{} 触发{}聚合", trigger.as_str(), request.mode);
                // 定时触发的运行不需要等待结果
                drop(self.spawn_run(permit, request));
            }
            BeginOutcome::Busy => {
                warn!("已有聚合正在运行，跳过本次 {} 触发", trigger.as_str());
                self.metrics.record_skipped_trigger(trigger.as_str(), "already_running");
            }
            BeginOutcome::NothingDirty => {
                debug!("没有脏坐席，跳过本次增量聚合");
                self.metrics.record_skipped_trigger(trigger.as_str(), "no_dirty_agents");
            }
        }
    }

    /// 运行在独立任务中并持有门控，调用方取消等待不会提前释放门控
    fn spawn_run(
        self: &Arc<Self>,
        permit: RunPermit,
        request: RunRequest,
    ) -> JoinHandle<RunResult> {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.execute_run(permit, request).await })
    }

    async fn execute_run(&self, permit: RunPermit, request: RunRequest) -> RunResult {
        let started_at = Utc::now();
        let run_timer = Instant::now();
        let mode = request.mode;
        let drained = match (&request.mode, &request.targets) {
            (RunMode::Incremental, RunTargets::Agents(ids)) => ids.clone(),
            _ => Vec::new(),
        };

        let outcome = AssertUnwindSafe(self.runner.run(request))
            .catch_unwind()
            .await;
        let elapsed_ms = run_timer.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("{}聚合执行异常: {}", mode, e);
                RunResult::fatal(mode, e.to_string(), started_at, elapsed_ms)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("{}聚合执行崩溃: {}", mode, message);
                RunResult::fatal(mode, message, started_at, elapsed_ms)
            }
        };

        if !result.success && !drained.is_empty() {
            // 运行整体失败时把取走的坐席放回，下一轮重试
            self.dirty_set.restore(&drained);
            debug!("已将 {} 个坐席放回脏集合", drained.len());
        }

        self.metrics.record_run(&result);
        self.metrics.set_dirty_agents(self.dirty_set.len());
        permit.finish(result.clone());
        result
    }

    fn status(&self) -> SchedulerStatus {
        let state = self.state();
        SchedulerStatus {
            is_running: state.is_running,
            started: state.started,
            last_run_time: state.last_run_time,
            next_main_aggregation_time: state.next_main_aggregation_time,
            config: self.config.clone(),
            last_run_result: state.last_run_result.clone(),
            dirty_count: self.dirty_set.len(),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("聚合执行崩溃: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("聚合执行崩溃: {message}")
    } else {
        "聚合执行崩溃".to_string()
    }
}

/// 已启动的定时器及运行循环
struct Lifecycle {
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

/// 统计聚合调度器
///
/// 由进程入口构造一次，以 `Arc` 共享给需要查看状态或手动触发的调用方。
/// 对外只暴露 `start`、`stop`、`get_status`、`trigger_manual` 以及给采集管道使用的
/// `mark_dirty`。
pub struct StatsScheduler {
    inner: Arc<SchedulerInner>,
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl StatsScheduler {
    pub fn new(
        config: SchedulerConfig,
        runner: Arc<dyn AggregationRunner>,
        dirty_set: Arc<DirtySet>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                runner,
                dirty_set,
                metrics,
                state: RwLock::new(SchedulerState::default()),
            }),
            lifecycle: Mutex::new(None),
        }
    }

    /// 启动定时器
    ///
    /// 配置无效时返回错误且不启动任何定时器；`enabled = false` 时什么也不做；
    /// 重复调用无副作用。
    pub fn start(&self) -> StatsResult<()> {
        let config = &self.inner.config;
        config.validate()?;

        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if lifecycle.is_some() {
            debug!("调度器已经启动");
            return Ok(());
        }
        if !config.enabled {
            info!("调度器已禁用，不启动定时器");
            return Ok(());
        }

        let first_main = calendar::next_hour_occurrence(config.main_aggregation_hour, Utc::now())?;
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);

        let run_loop = tokio::spawn(run_loop(
            Arc::clone(&self.inner),
            trigger_rx,
            shutdown_tx.subscribe(),
        ));
        let dirty_timer = spawn_dirty_timer(
            config.dirty_interval(),
            trigger_tx.clone(),
            shutdown_tx.subscribe(),
        );
        let rearm_inner = Arc::clone(&self.inner);
        let main_timer = spawn_main_timer(
            config.main_aggregation_hour,
            first_main,
            trigger_tx,
            shutdown_tx.subscribe(),
            move |next| rearm_inner.state_mut().next_main_aggregation_time = Some(next),
        );

        {
            let mut state = self.inner.state_mut();
            state.started = true;
            state.next_main_aggregation_time = Some(first_main);
        }
        *lifecycle = Some(Lifecycle {
            shutdown_tx,
            handles: vec![run_loop, dirty_timer, main_timer],
        });

        info!(
            "调度器已启动: 增量周期 {}ms，全量聚合北京时间 {}:00，下次全量 {}",
            config.dirty_interval_ms, config.main_aggregation_hour, first_main
        );
        Ok(())
    }

    /// 停止定时器，正在进行的运行不受影响
    pub async fn stop(&self) {
        let lifecycle = self
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(lifecycle) = lifecycle else {
            debug!("调度器未启动，无需停止");
            return;
        };

        let _ = lifecycle.shutdown_tx.send(());
        for handle in lifecycle.handles {
            if let Err(e) = handle.await {
                warn!("定时器任务退出异常: {}", e);
            }
        }

        {
            let mut state = self.inner.state_mut();
            state.started = false;
            state.next_main_aggregation_time = None;
        }
        info!("调度器已停止");
    }

    pub fn get_status(&self) -> SchedulerStatus {
        self.inner.status()
    }

    /// 手动触发一次运行
    ///
    /// 指定坐席时对该坐席做全量重算，否则立即对当前脏坐席做增量聚合。
    /// 已有运行时立即返回 [`StatsError::AlreadyRunning`]，不排队也不抢占。
    pub async fn trigger_manual(&self, agent_id: Option<&str>) -> StatsResult<RunResult> {
        let pending = match agent_id {
            Some(agent_id) => PendingRun::Full(RunRequest::full_for(agent_id)),
            None => PendingRun::Dirty {
                skip_if_empty: false,
            },
        };

        self.run_now(pending).await
    }

    /// 立即对全部已知坐席做全量重算，门控规则与手动触发相同
    ///
    /// 脏集合只存在于进程内存中，新启动的进程应使用全量重算。
    pub async fn trigger_full_all(&self) -> StatsResult<RunResult> {
        self.run_now(PendingRun::Full(RunRequest::full_all())).await
    }

    async fn run_now(&self, pending: PendingRun) -> StatsResult<RunResult> {
        let (permit, request) = match self.inner.try_begin(pending) {
            BeginOutcome::Started(permit, request) => (permit, request),
            BeginOutcome::Busy | BeginOutcome::NothingDirty => {
                info!("已有聚合正在运行，拒绝手动触发");
                self.inner.metrics.record_skipped_trigger("manual", "already_running");
                return Err(StatsError::AlreadyRunning);
            }
        };

        info!("手动触发{}聚合", request.mode);
        self.inner
            .spawn_run(permit, request)
            .await
            .map_err(|e| StatsError::Internal(format!("聚合任务异常退出: {e}")))
    }

    /// 采集管道在坐席数据变化时调用
    pub fn mark_dirty(&self, agent_id: impl Into<String>) {
        self.inner.dirty_set.mark_dirty(agent_id);
        self.inner.metrics.set_dirty_agents(self.inner.dirty_set.len());
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn dirty_set(&self) -> &Arc<DirtySet> {
        &self.inner.dirty_set
    }
}

async fn run_loop(
    inner: Arc<SchedulerInner>,
    mut trigger_rx: mpsc::Receiver<Trigger>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            trigger = trigger_rx.recv() => match trigger {
                Some(trigger) => inner.handle_trigger(trigger),
                None => break,
            },
            _ = shutdown_rx.recv() => {
                debug!("运行循环收到停止信号");
                break;
            }
        }
    }
}
