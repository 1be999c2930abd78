use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use stats_core::{
    calendar, AgentStatAggregate, EventKind, RawEvent, StatCounters, StatsError, StatsResult,
    ALL_GROUP_KEY,
};

/// 把单个坐席的原始事件累加为按北京自然日分桶的聚合行
///
/// 每个出现过事件的日期都会产生一条汇总行（分组键 `*`），另外每个出现过的
/// 品牌/岗位组合各产生一条维度行。
#[derive(Debug)]
pub struct BucketAccumulator {
    agent_id: String,
    computed_at: DateTime<Utc>,
    rows: BTreeMap<(NaiveDate, String), StatCounters>,
}

impl BucketAccumulator {
    pub fn new(agent_id: impl Into<String>, computed_at: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.into(),
            computed_at,
            rows: BTreeMap::new(),
        }
    }

    /// 累加一条事件；坐席不匹配或事件类型未知视为源数据格式错误
    pub fn add(&mut self, event: &RawEvent) -> StatsResult<()> {
        if event.agent_id != self.agent_id {
            return Err(StatsError::malformed_event(
                &self.agent_id,
                format!("事件 {} 属于坐席 {}", event.id, event.agent_id),
            ));
        }
        let kind: EventKind = event.kind.parse().map_err(|_| {
            StatsError::malformed_event(
                &self.agent_id,
                format!("事件 {} 的类型未知: {}", event.id, event.kind),
            )
        })?;

        let date = calendar::bucket_date(event.occurred_at);
        self.counters_mut(date, ALL_GROUP_KEY).record(kind);
        if let Some(dimension) = event.dimension_key() {
            self.counters_mut(date, &dimension).record(kind);
        }
        Ok(())
    }

    /// 保证某一天的汇总行存在，即使当天没有任何事件
    pub fn ensure_bucket(&mut self, date: NaiveDate) {
        self.counters_mut(date, ALL_GROUP_KEY);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_aggregates(self) -> Vec<AgentStatAggregate> {
        let agent_id = self.agent_id;
        let computed_at = self.computed_at;
        self.rows
            .into_iter()
            .map(|((bucket_date, group_key), counters)| AgentStatAggregate {
                agent_id: agent_id.clone(),
                bucket_date,
                group_key,
                counters,
                last_computed_at: computed_at,
            })
            .collect()
    }

    fn counters_mut(&mut self, date: NaiveDate, group_key: &str) -> &mut StatCounters {
        self.rows
            .entry((date, group_key.to_string()))
            .or_default()
    }
}

/// 累加全部事件并补齐 `today` 的汇总行
pub fn accumulate(
    agent_id: &str,
    events: &[RawEvent],
    computed_at: DateTime<Utc>,
) -> StatsResult<Vec<AgentStatAggregate>> {
    let mut accumulator = BucketAccumulator::new(agent_id, computed_at);
    for event in events {
        accumulator.add(event)?;
    }
    accumulator.ensure_bucket(calendar::bucket_date(computed_at));
    Ok(accumulator.into_aggregates())
}
