use std::time::Duration;

use chrono::Utc;
use stats_core::{calendar, AppConfig, EventKind, RunMode, ALL_GROUP_KEY};
use stats_scheduler::{Application, ShutdownManager};
use stats_testing_utils::{agent_ids, wait_for, RawEventBuilder};

fn memory_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = "sqlite::memory:".to_string();
    config.scheduler.batch_size = 10;
    config.scheduler.dirty_interval_ms = 60_000;
    config
}

#[tokio::test]
async fn test_dirty_agents_aggregated_into_sqlite() {
    let app = Application::new(memory_config()).await.unwrap();
    let repository = app.repository();
    let scheduler = app.scheduler();

    let ids = agent_ids("A", 25);
    for id in &ids {
        repository
            .record_raw_event(&RawEventBuilder::new(id).build())
            .await
            .unwrap();
        repository
            .record_raw_event(
                &RawEventBuilder::new(id)
                    .with_kind(EventKind::InterviewBooked)
                    .with_brand("kfc")
                    .with_job("cashier")
                    .build(),
            )
            .await
            .unwrap();
        scheduler.mark_dirty(id.as_str());
    }

    let result = scheduler.trigger_manual(None).await.unwrap();
    assert_eq!(result.mode, RunMode::Incremental);
    assert!(result.success);
    assert_eq!(result.processed_count, 25);
    assert_eq!(scheduler.get_status().dirty_count, 0);

    let today = calendar::bucket_date(Utc::now());
    let rows = repository.list_aggregates("A7").await.unwrap();
    assert_eq!(rows.len(), 2);
    let all = rows
        .iter()
        .find(|row| row.group_key == ALL_GROUP_KEY)
        .unwrap();
    assert_eq!(all.bucket_date, today);
    assert_eq!(all.counters.total_events, 2);
    assert_eq!(all.counters.interviews_booked, 1);
    let dimension = rows.iter().find(|row| !row.is_all_group()).unwrap();
    assert_eq!(dimension.group_key, "brand:kfc|job:cashier");
    assert_eq!(dimension.counters.total_events, 1);
}

#[tokio::test]
async fn test_manual_full_recompute_rebuilds_one_agent() {
    let app = Application::new(memory_config()).await.unwrap();
    let repository = app.repository();
    let scheduler = app.scheduler();

    let old = Utc::now() - chrono::Duration::days(3);
    repository
        .record_raw_event(&RawEventBuilder::new("A1").at(old).build())
        .await
        .unwrap();
    repository
        .record_raw_event(&RawEventBuilder::new("A1").build())
        .await
        .unwrap();
    scheduler.mark_dirty("A1");

    let result = scheduler.trigger_manual(Some("A1")).await.unwrap();
    assert_eq!(result.mode, RunMode::Full);
    assert_eq!(result.processed_count, 1);
    // 全量重算不影响脏标记
    assert_eq!(scheduler.get_status().dirty_count, 1);

    let rows = repository.list_aggregates("A1").await.unwrap();
    let dates: Vec<_> = rows.iter().map(|row| row.bucket_date).collect();
    assert!(dates.contains(&calendar::bucket_date(old)));
    assert!(dates.contains(&calendar::bucket_date(Utc::now())));
}

#[tokio::test]
async fn test_malformed_agent_does_not_block_others() {
    let app = Application::new(memory_config()).await.unwrap();
    let repository = app.repository();
    let scheduler = app.scheduler();

    repository
        .record_raw_event(&RawEventBuilder::new("good").build())
        .await
        .unwrap();
    repository
        .record_raw_event(&RawEventBuilder::new("bad").with_raw_kind("typo").build())
        .await
        .unwrap();
    scheduler.mark_dirty("good");
    scheduler.mark_dirty("bad");

    let result = scheduler.trigger_manual(None).await.unwrap();
    assert!(result.success);
    assert_eq!(result.processed_count, 1);
    assert_eq!(result.failed_count, 1);
    assert_eq!(result.errors[0].agent_id, "bad");

    let status = scheduler.get_status();
    assert_eq!(status.dirty_count, 1);
    assert!(scheduler.dirty_set().contains("bad"));
}

#[tokio::test]
async fn test_run_once_without_agent_rebuilds_all_known() {
    let app = Application::new(memory_config()).await.unwrap();
    let repository = app.repository();
    for id in agent_ids("A", 3) {
        repository
            .record_raw_event(&RawEventBuilder::new(&id).build())
            .await
            .unwrap();
    }

    // 新进程没有任何脏标记
    assert_eq!(app.scheduler().get_status().dirty_count, 0);
    let result = app.run_once(None).await.unwrap();
    assert_eq!(result.mode, RunMode::Full);
    assert!(result.success);
    assert_eq!(result.processed_count, 3);
}

#[tokio::test]
async fn test_run_until_shutdown() {
    let app = std::sync::Arc::new(Application::new(memory_config()).await.unwrap());
    let scheduler = app.scheduler();
    let shutdown = ShutdownManager::new();
    let shutdown_rx = shutdown.subscribe().await;

    let handle = {
        let app = std::sync::Arc::clone(&app);
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    assert!(
        wait_for(
            || async { scheduler.get_status().started },
            Duration::from_secs(5)
        )
        .await
    );
    assert!(scheduler.get_status().next_main_aggregation_time.is_some());

    shutdown.shutdown().await;
    handle.await.unwrap().unwrap();

    let status = scheduler.get_status();
    assert!(!status.started);
    assert!(!status.is_running);

    // 连接池关闭后手动触发得到运行级失败，而不是错误
    let result = scheduler.trigger_manual(None).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.processed_count, 0);
}

#[test]
fn test_load_config_from_file() {
    use std::io::Write;

    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        "[database]\nurl = \"sqlite::memory:\"\n\n[scheduler]\ndirty_interval_ms = 1000\nmain_aggregation_hour = 23"
    )
    .unwrap();

    let config = AppConfig::load(file.path().to_str()).unwrap();
    assert_eq!(config.scheduler.dirty_interval_ms, 1000);
    assert_eq!(config.scheduler.main_aggregation_hour, 23);
    assert_eq!(config.scheduler.batch_size, 50);
    assert!(config.database.is_in_memory());
}
