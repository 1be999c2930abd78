use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    models::{AgentStatAggregate, RawEvent},
    StatsResult,
};

/// 持久化层接口
///
/// 原始事件由外部采集管道写入，聚合行只由聚合 Worker 写入。
#[async_trait]
pub trait StatsRepository: Send + Sync {
    /// 可达性探测，失败即视为运行级致命错误
    async fn health_check(&self) -> StatsResult<()>;

    /// 读取坐席的原始事件，`since_bucket` 为北京日期下界（含）
    async fn read_raw_events(
        &self,
        agent_id: &str,
        since_bucket: Option<NaiveDate>,
    ) -> StatsResult<Vec<RawEvent>>;

    /// 按 (agent_id, bucket_date, group_key) 覆盖写入
    async fn upsert_aggregate(&self, aggregate: &AgentStatAggregate) -> StatsResult<()>;

    /// 原子地覆盖写入坐席的一组聚合行，任一行失败则整组不生效
    async fn upsert_aggregates(
        &self,
        agent_id: &str,
        aggregates: &[AgentStatAggregate],
    ) -> StatsResult<()>;

    /// 丢弃坐席的全部聚合行并原子地写入新集合
    async fn replace_agent_aggregates(
        &self,
        agent_id: &str,
        aggregates: &[AgentStatAggregate],
    ) -> StatsResult<()>;

    /// 所有已知坐席
    async fn list_known_agent_ids(&self) -> StatsResult<Vec<String>>;

    /// 坐席聚合行中最新的计算时间，从未聚合过时返回 `None`
    async fn last_computed_at(&self, agent_id: &str) -> StatsResult<Option<DateTime<Utc>>>;
}
