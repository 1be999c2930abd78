use std::sync::Arc;
use std::time::Duration;

use chrono::{Timelike, Utc};
use stats_core::{calendar, RunMode, RunTargets, SchedulerConfig, StatsError, WILDCARD_AGENT_ID};
use stats_dispatcher::StatsScheduler;
use stats_infrastructure::{DirtySet, MetricsCollector};
use stats_testing_utils::{
    agent_ids, wait_for, MockAggregationRunner, MockStatsRepository, RawEventBuilder,
    RunnerBehavior,
};
use stats_worker::AggregationWorker;

fn config() -> SchedulerConfig {
    SchedulerConfig {
        dirty_interval_ms: 60_000,
        main_aggregation_hour: 2,
        batch_size: 10,
        enabled: true,
    }
}

fn scheduler_with_runner(config: SchedulerConfig) -> (StatsScheduler, Arc<MockAggregationRunner>) {
    let runner = Arc::new(MockAggregationRunner::new());
    let scheduler = StatsScheduler::new(
        config,
        runner.clone(),
        Arc::new(DirtySet::new()),
        Arc::new(MetricsCollector::new()),
    );
    (scheduler, runner)
}

async fn wait_idle_with_result(scheduler: &StatsScheduler) -> bool {
    wait_for(
        || async {
            let status = scheduler.get_status();
            !status.is_running && status.last_run_result.is_some()
        },
        Duration::from_secs(5),
    )
    .await
}

#[tokio::test(start_paused = true)]
async fn test_dirty_interval_runs_chunks_end_to_end() {
    let repo = MockStatsRepository::new();
    let dirty_set = Arc::new(DirtySet::new());
    let worker = AggregationWorker::new(Arc::new(repo.clone()), dirty_set.clone(), 10);
    let scheduler = StatsScheduler::new(
        config(),
        Arc::new(worker),
        dirty_set.clone(),
        Arc::new(MetricsCollector::new()),
    );

    let ids = agent_ids("A", 25);
    for id in &ids {
        repo.add_event(RawEventBuilder::new(id).build());
        scheduler.mark_dirty(id.as_str());
    }

    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(60_500)).await;
    assert!(wait_idle_with_result(&scheduler).await);

    let status = scheduler.get_status();
    let result = status.last_run_result.unwrap();
    assert_eq!(result.mode, RunMode::Incremental);
    assert!(result.success);
    assert_eq!(result.processed_count, 25);
    assert_eq!(result.failed_count, 0);
    assert!(status.last_run_time.is_some());
    assert_eq!(status.dirty_count, 0);
    assert!(dirty_set.is_empty());

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_idle_interval_produces_no_result() {
    let (scheduler, runner) = scheduler_with_runner(config());
    scheduler.start().unwrap();

    tokio::time::sleep(Duration::from_secs(185)).await;

    let status = scheduler.get_status();
    assert!(status.last_run_result.is_none());
    assert!(status.last_run_time.is_none());
    assert_eq!(runner.run_count(), 0);

    scheduler.stop().await;
}

#[tokio::test]
async fn test_manual_trigger_while_running_is_rejected() {
    let (scheduler, runner) = scheduler_with_runner(config());
    let scheduler = Arc::new(scheduler);
    scheduler.mark_dirty("A1");
    runner.hold();

    let first = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.trigger_manual(Some("B1")).await })
    };
    runner.wait_started().await;
    assert!(scheduler.get_status().is_running);

    let before = scheduler.get_status();
    let err = scheduler.trigger_manual(None).await.unwrap_err();
    assert!(matches!(err, StatsError::AlreadyRunning));

    // 被拒绝的触发没有任何副作用
    let after = scheduler.get_status();
    assert_eq!(after.last_run_time, before.last_run_time);
    assert!(after.last_run_result.is_none());
    assert!(scheduler.dirty_set().contains("A1"));
    assert_eq!(runner.run_count(), 1);

    runner.release();
    let result = first.await.unwrap().unwrap();
    assert_eq!(result.mode, RunMode::Full);
    assert!(!scheduler.get_status().is_running);

    // 门控释放后可以再次触发
    let result = scheduler.trigger_manual(None).await.unwrap();
    assert_eq!(result.mode, RunMode::Incremental);
    assert!(!scheduler.dirty_set().contains("A1"));
}

#[tokio::test]
async fn test_manual_trigger_targets() {
    let (scheduler, runner) = scheduler_with_runner(config());
    scheduler.mark_dirty("A1");
    scheduler.mark_dirty("A2");

    scheduler.trigger_manual(Some("X")).await.unwrap();
    scheduler.trigger_manual(None).await.unwrap();
    // 空集合的手动增量仍然产生结果
    let result = scheduler.trigger_manual(None).await.unwrap();
    assert!(result.success);

    let requests = runner.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].mode, RunMode::Full);
    assert_eq!(requests[0].targets, RunTargets::Agents(vec!["X".to_string()]));
    assert_eq!(requests[1].mode, RunMode::Incremental);
    let mut drained = requests[1].targets.explicit_agents().unwrap().to_vec();
    drained.sort();
    assert_eq!(drained, vec!["A1", "A2"]);
    assert_eq!(requests[2].targets, RunTargets::Agents(Vec::new()));
}

#[tokio::test]
async fn test_trigger_full_all_shares_the_gate() {
    let (scheduler, runner) = scheduler_with_runner(config());
    let scheduler = Arc::new(scheduler);
    scheduler.mark_dirty("A1");
    runner.hold();

    let first = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.trigger_full_all().await })
    };
    runner.wait_started().await;
    let err = scheduler.trigger_full_all().await.unwrap_err();
    assert!(matches!(err, StatsError::AlreadyRunning));

    runner.release();
    let result = first.await.unwrap().unwrap();
    assert_eq!(result.mode, RunMode::Full);
    assert_eq!(runner.requests()[0].targets, RunTargets::AllKnown);
    assert!(scheduler.dirty_set().contains("A1"));
}

#[tokio::test]
async fn test_runner_error_becomes_failed_result() {
    let (scheduler, runner) = scheduler_with_runner(config());
    runner.set_behavior(RunnerBehavior::Error("store exploded".to_string()));
    scheduler.mark_dirty("A1");

    let result = scheduler.trigger_manual(None).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].agent_id, WILDCARD_AGENT_ID);
    assert!(result.errors[0].message.contains("store exploded"));

    let status = scheduler.get_status();
    assert!(!status.is_running);
    assert_eq!(status.last_run_result, Some(result));
    // 取走的坐席已放回
    assert!(scheduler.dirty_set().contains("A1"));
}

#[tokio::test]
async fn test_fatal_run_restores_drained_agents() {
    let repo = MockStatsRepository::new();
    repo.set_unreachable(true);
    let dirty_set = Arc::new(DirtySet::new());
    let worker = AggregationWorker::new(Arc::new(repo.clone()), dirty_set.clone(), 10);
    let scheduler = StatsScheduler::new(
        config(),
        Arc::new(worker),
        dirty_set.clone(),
        Arc::new(MetricsCollector::new()),
    );
    scheduler.mark_dirty("A1");
    scheduler.mark_dirty("A2");

    let result = scheduler.trigger_manual(None).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.processed_count, 0);
    assert_eq!(dirty_set.len(), 2);
}

#[tokio::test]
async fn test_panicking_runner_does_not_wedge_gate() {
    let (scheduler, runner) = scheduler_with_runner(config());
    runner.set_behavior(RunnerBehavior::Panic("worker bug".to_string()));

    let result = scheduler.trigger_manual(Some("A1")).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.errors[0].agent_id, WILDCARD_AGENT_ID);

    runner.set_behavior(RunnerBehavior::Succeed);
    let result = scheduler.trigger_manual(Some("A1")).await.unwrap();
    assert!(result.success);
    assert_eq!(result.processed_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timer_skipped_while_manual_run_active() {
    let (scheduler, runner) = scheduler_with_runner(config());
    let scheduler = Arc::new(scheduler);
    scheduler.start().unwrap();
    runner.hold();

    let manual = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.trigger_manual(Some("B1")).await })
    };
    runner.wait_started().await;

    scheduler.mark_dirty("A1");
    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(runner.run_count(), 1);
    assert!(scheduler.dirty_set().contains("A1"));

    runner.release();
    manual.await.unwrap().unwrap();

    // 下一个周期正常取走
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(
        wait_for(
            || async { runner.run_count() == 2 && !scheduler.get_status().is_running },
            Duration::from_secs(5)
        )
        .await
    );
    assert!(!scheduler.dirty_set().contains("A1"));

    scheduler.stop().await;
}

#[tokio::test]
async fn test_start_reports_next_main_aggregation() {
    let (scheduler, _runner) = scheduler_with_runner(config());
    let before = Utc::now();
    scheduler.start().unwrap();

    let status = scheduler.get_status();
    assert!(status.started);
    let next = status.next_main_aggregation_time.unwrap();
    assert!(next > before);
    assert!(next - before <= chrono::Duration::hours(24));
    let local = calendar::to_beijing_naive(next);
    assert_eq!((local.hour(), local.minute(), local.second()), (2, 0, 0));
    assert_eq!(status.config, config());

    scheduler.stop().await;
    let status = scheduler.get_status();
    assert!(!status.started);
    assert!(status.next_main_aggregation_time.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_main_timer_runs_full_aggregation_and_rearms() {
    let (scheduler, runner) = scheduler_with_runner(SchedulerConfig {
        dirty_interval_ms: 48 * 3_600_000,
        ..config()
    });
    scheduler.mark_dirty("A1");
    scheduler.start().unwrap();
    let first = scheduler.get_status().next_main_aggregation_time.unwrap();

    let until_fire = (first - Utc::now()).to_std().unwrap();
    tokio::time::sleep(until_fire + Duration::from_secs(1)).await;
    assert!(wait_idle_with_result(&scheduler).await);

    let requests = runner.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].mode, RunMode::Full);
    assert_eq!(requests[0].targets, RunTargets::AllKnown);

    let status = scheduler.get_status();
    let result = status.last_run_result.unwrap();
    assert_eq!(result.mode, RunMode::Full);
    assert!(result.success);
    assert!(status.last_run_time.is_some());
    assert_eq!(
        status.next_main_aggregation_time,
        Some(first + chrono::Duration::days(1))
    );
    // 全量运行不取走脏坐席
    assert!(scheduler.dirty_set().contains("A1"));

    scheduler.stop().await;
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let (scheduler, _runner) = scheduler_with_runner(config());
    scheduler.stop().await;

    scheduler.start().unwrap();
    let first = scheduler.get_status().next_main_aggregation_time;
    scheduler.start().unwrap();
    assert_eq!(scheduler.get_status().next_main_aggregation_time, first);

    scheduler.stop().await;
    scheduler.stop().await;
    assert!(!scheduler.get_status().started);
}

#[tokio::test]
async fn test_disabled_scheduler_never_arms() {
    let (scheduler, _runner) = scheduler_with_runner(SchedulerConfig {
        enabled: false,
        ..config()
    });
    scheduler.start().unwrap();

    let status = scheduler.get_status();
    assert!(!status.started);
    assert!(status.next_main_aggregation_time.is_none());

    // 手动触发不依赖定时器
    let result = scheduler.trigger_manual(Some("A1")).await.unwrap();
    assert!(result.success);
}

#[tokio::test]
async fn test_invalid_config_rejected_at_start() {
    for broken in [
        SchedulerConfig {
            main_aggregation_hour: 24,
            ..config()
        },
        SchedulerConfig {
            dirty_interval_ms: 0,
            ..config()
        },
        SchedulerConfig {
            batch_size: 0,
            ..config()
        },
    ] {
        let (scheduler, _runner) = scheduler_with_runner(broken);
        let err = scheduler.start().unwrap_err();
        assert!(matches!(err, StatsError::Configuration(_)));
        assert!(!scheduler.get_status().started);
    }
}
