use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use stats_core::{DatabaseConfig, StatsError, StatsResult};
use tracing::{debug, info};

use super::sqlite::SqliteStatsRepository;

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> StatsResult<Self> {
        let mut connect_options =
            SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));

        if config.is_in_memory() {
            // 内存库随连接销毁，固定单连接且不回收
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            let parent = connect_options.get_filename().parent();
            if let Some(dir) = parent.filter(|dir| !dir.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir).map_err(|e| {
                    StatsError::database_error(format!(
                        "创建数据库目录失败 {}: {e}",
                        dir.display()
                    ))
                })?;
            }
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
            pool_options = pool_options
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
                .max_lifetime(Duration::from_secs(1800)); // 30分钟默认生命周期
        }

        let pool = pool_options.connect_with(connect_options).await?;
        info!("数据库连接池已创建: {}", config.url);

        Ok(Self { pool })
    }

    /// 单连接内存库，测试和一次性运行使用
    pub async fn in_memory() -> StatsResult<Self> {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        };
        Self::new(&config).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> StatsResult<()> {
        debug!("执行数据库迁移");
        SqliteStatsRepository::run_migrations(&self.pool).await
    }

    pub async fn health_check(&self) -> StatsResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn stats_repository(&self) -> SqliteStatsRepository {
        SqliteStatsRepository::new(self.pool.clone())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
