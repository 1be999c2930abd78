use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{query::Query, Row, Sqlite, SqlitePool};
use stats_core::{
    calendar, AgentStatAggregate, RawEvent, StatCounters, StatsError, StatsRepository,
    StatsResult,
};
use tracing::{debug, instrument};

pub struct SqliteStatsRepository {
    pool: SqlitePool,
}

impl SqliteStatsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 运行数据库迁移
    pub async fn run_migrations(pool: &SqlitePool) -> StatsResult<()> {
        debug!("Running SQLite database migrations");

        // 原始事件表，由采集管道写入
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS raw_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                brand TEXT,
                job_id TEXT,
                occurred_at DATETIME NOT NULL,
                bucket_date TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        // 聚合结果表，每个 (坐席, 日期, 分组) 一行
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_stat_aggregates (
                agent_id TEXT NOT NULL,
                bucket_date TEXT NOT NULL,
                group_key TEXT NOT NULL,
                messages_handled INTEGER NOT NULL DEFAULT 0,
                candidates_matched INTEGER NOT NULL DEFAULT 0,
                interviews_booked INTEGER NOT NULL DEFAULT 0,
                total_events INTEGER NOT NULL DEFAULT 0,
                last_computed_at DATETIME NOT NULL,
                PRIMARY KEY (agent_id, bucket_date, group_key)
            )
            "#,
        )
        .execute(pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_raw_events_agent_bucket ON raw_events(agent_id, bucket_date)",
            "CREATE INDEX IF NOT EXISTS idx_aggregates_computed ON agent_stat_aggregates(agent_id, last_computed_at)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql).execute(pool).await?;
        }

        debug!("Successfully completed SQLite database migrations");
        Ok(())
    }

    /// 写入一条原始事件，返回自增ID
    ///
    /// 供采集侧和测试使用，`event.id` 被忽略。
    pub async fn record_raw_event(&self, event: &RawEvent) -> StatsResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO raw_events (agent_id, kind, brand, job_id, occurred_at, bucket_date)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.agent_id)
        .bind(&event.kind)
        .bind(&event.brand)
        .bind(&event.job_id)
        .bind(event.occurred_at)
        .bind(calendar::bucket_date(event.occurred_at))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// 坐席的全部聚合行，按日期和分组排序
    pub async fn list_aggregates(&self, agent_id: &str) -> StatsResult<Vec<AgentStatAggregate>> {
        let rows = sqlx::query(
            r#"
            SELECT agent_id, bucket_date, group_key, messages_handled, candidates_matched,
                   interviews_booked, total_events, last_computed_at
            FROM agent_stat_aggregates
            WHERE agent_id = ?
            ORDER BY bucket_date, group_key
            "#,
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_aggregate).collect()
    }

    fn upsert_query(aggregate: &AgentStatAggregate) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        sqlx::query(
            r#"
            INSERT INTO agent_stat_aggregates (
                agent_id, bucket_date, group_key, messages_handled, candidates_matched,
                interviews_booked, total_events, last_computed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(agent_id, bucket_date, group_key) DO UPDATE SET
                messages_handled = excluded.messages_handled,
                candidates_matched = excluded.candidates_matched,
                interviews_booked = excluded.interviews_booked,
                total_events = excluded.total_events,
                last_computed_at = excluded.last_computed_at
            "#,
        )
        .bind(&aggregate.agent_id)
        .bind(aggregate.bucket_date)
        .bind(&aggregate.group_key)
        .bind(aggregate.counters.messages_handled)
        .bind(aggregate.counters.candidates_matched)
        .bind(aggregate.counters.interviews_booked)
        .bind(aggregate.counters.total_events)
        .bind(aggregate.last_computed_at)
    }

    fn ensure_owned(agent_id: &str, aggregates: &[AgentStatAggregate]) -> StatsResult<()> {
        match aggregates.iter().find(|a| a.agent_id != agent_id) {
            Some(foreign) => Err(StatsError::Internal(format!(
                "聚合行坐席不匹配: 期望 {agent_id}，实际 {}",
                foreign.agent_id
            ))),
            None => Ok(()),
        }
    }

    fn row_to_event(row: &SqliteRow) -> StatsResult<RawEvent> {
        Ok(RawEvent {
            id: row.try_get("id")?,
            agent_id: row.try_get("agent_id")?,
            kind: row.try_get("kind")?,
            brand: row.try_get("brand")?,
            job_id: row.try_get("job_id")?,
            occurred_at: row.try_get("occurred_at")?,
        })
    }

    fn row_to_aggregate(row: &SqliteRow) -> StatsResult<AgentStatAggregate> {
        Ok(AgentStatAggregate {
            agent_id: row.try_get("agent_id")?,
            bucket_date: row.try_get("bucket_date")?,
            group_key: row.try_get("group_key")?,
            counters: StatCounters {
                messages_handled: row.try_get("messages_handled")?,
                candidates_matched: row.try_get("candidates_matched")?,
                interviews_booked: row.try_get("interviews_booked")?,
                total_events: row.try_get("total_events")?,
            },
            last_computed_at: row.try_get("last_computed_at")?,
        })
    }
}

#[async_trait]
impl StatsRepository for SqliteStatsRepository {
    async fn health_check(&self) -> StatsResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StatsError::store_unavailable(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn read_raw_events(
        &self,
        agent_id: &str,
        since_bucket: Option<NaiveDate>,
    ) -> StatsResult<Vec<RawEvent>> {
        let rows = match since_bucket {
            Some(since) => {
                sqlx::query(
                    r#"
                    SELECT id, agent_id, kind, brand, job_id, occurred_at
                    FROM raw_events
                    WHERE agent_id = ? AND bucket_date >= ?
                    ORDER BY occurred_at, id
                    "#,
                )
                .bind(agent_id)
                .bind(since)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, agent_id, kind, brand, job_id, occurred_at
                    FROM raw_events
                    WHERE agent_id = ?
                    ORDER BY occurred_at, id
                    "#,
                )
                .bind(agent_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        debug!("读取到 {} 条原始事件", rows.len());
        rows.iter().map(Self::row_to_event).collect()
    }

    async fn upsert_aggregate(&self, aggregate: &AgentStatAggregate) -> StatsResult<()> {
        Self::upsert_query(aggregate).execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip(self, aggregates), fields(rows = aggregates.len()))]
    async fn upsert_aggregates(
        &self,
        agent_id: &str,
        aggregates: &[AgentStatAggregate],
    ) -> StatsResult<()> {
        Self::ensure_owned(agent_id, aggregates)?;

        let mut tx = self.pool.begin().await?;
        for aggregate in aggregates {
            Self::upsert_query(aggregate).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, aggregates), fields(rows = aggregates.len()))]
    async fn replace_agent_aggregates(
        &self,
        agent_id: &str,
        aggregates: &[AgentStatAggregate],
    ) -> StatsResult<()> {
        Self::ensure_owned(agent_id, aggregates)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM agent_stat_aggregates WHERE agent_id = ?")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;

        for aggregate in aggregates {
            Self::upsert_query(aggregate).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_known_agent_ids(&self) -> StatsResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT agent_id FROM raw_events
            UNION
            SELECT agent_id FROM agent_stat_aggregates
            ORDER BY agent_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("agent_id").map_err(StatsError::from))
            .collect()
    }

    async fn last_computed_at(&self, agent_id: &str) -> StatsResult<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            r#"
            SELECT last_computed_at FROM agent_stat_aggregates
            WHERE agent_id = ?
            ORDER BY last_computed_at DESC
            LIMIT 1
            "#,
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row.try_get("last_computed_at"))
            .transpose()
            .map_err(StatsError::from)
    }
}
