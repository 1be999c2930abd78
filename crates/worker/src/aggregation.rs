use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use stats_core::{
    calendar, AgentError, AggregationRunner, RunMode, RunRequest, RunResult, RunTargets,
    StatsRepository, StatsResult,
};
use stats_infrastructure::DirtySet;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::bucket;

/// 单个坐席的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    Processed { agent_id: String, rows: usize },
    Failed(AgentError),
}

/// 按 `batch_size` 把坐席切分为连续的批次，`batch_size` 为 0 时按 1 处理
pub fn plan_chunks(agent_ids: &[String], batch_size: usize) -> Vec<&[String]> {
    agent_ids.chunks(batch_size.max(1)).collect()
}

/// 聚合执行器
///
/// 批次之间严格串行，批次内部的坐席并发聚合，同一时刻最多 `batch_size`
/// 个坐席在访问存储。单个坐席的失败只记录在结果中，不会中断运行。
pub struct AggregationWorker {
    repository: Arc<dyn StatsRepository>,
    dirty_set: Arc<DirtySet>,
    batch_size: usize,
}

impl AggregationWorker {
    pub fn new(
        repository: Arc<dyn StatsRepository>,
        dirty_set: Arc<DirtySet>,
        batch_size: usize,
    ) -> Self {
        Self {
            repository,
            dirty_set,
            batch_size,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn resolve_targets(&self, targets: RunTargets) -> StatsResult<Vec<String>> {
        let ids = match targets {
            RunTargets::Agents(ids) => ids,
            RunTargets::AllKnown => self.repository.list_known_agent_ids().await?,
        };

        let mut seen = HashSet::with_capacity(ids.len());
        Ok(ids.into_iter().filter(|id| seen.insert(id.clone())).collect())
    }

    async fn process_agent(&self, agent_id: &str, mode: RunMode) -> AgentOutcome {
        let processing_from = Utc::now();

        match self.aggregate_agent(agent_id, mode, processing_from).await {
            Ok(rows) => {
                if mode == RunMode::Incremental {
                    self.dirty_set.clear_processed(agent_id, processing_from);
                }
                debug!("坐席 {} 聚合完成，写入 {} 行", agent_id, rows);
                AgentOutcome::Processed {
                    agent_id: agent_id.to_string(),
                    rows,
                }
            }
            Err(e) => {
                warn!("坐席 {} 聚合失败: {}", agent_id, e);
                if mode == RunMode::Incremental {
                    // 失败的坐席留在脏集合中，下一轮重试
                    self.dirty_set.restore(&[agent_id]);
                }
                AgentOutcome::Failed(AgentError {
                    agent_id: agent_id.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// 聚合单个坐席并写入存储，返回写入的行数
    ///
    /// 增量模式从上次计算所在的北京日期重算到今天。已知限制：
    /// `occurred_at` 早于该日期但迟到入库的事件不会被增量窗口覆盖，
    /// 由每日全量重算修正。
    async fn aggregate_agent(
        &self,
        agent_id: &str,
        mode: RunMode,
        computed_at: DateTime<Utc>,
    ) -> StatsResult<usize> {
        match mode {
            RunMode::Incremental => {
                let today = calendar::bucket_date(computed_at);
                let since = self
                    .repository
                    .last_computed_at(agent_id)
                    .await?
                    .map(|last| calendar::bucket_date(last).min(today));

                let events = self.repository.read_raw_events(agent_id, since).await?;
                let rows = bucket::accumulate(agent_id, &events, computed_at)?;
                // 整组原子写入，失败时 last_computed_at 不前移，重试仍覆盖完整窗口
                self.repository.upsert_aggregates(agent_id, &rows).await?;
                Ok(rows.len())
            }
            RunMode::Full => {
                let events = self.repository.read_raw_events(agent_id, None).await?;
                let rows = bucket::accumulate(agent_id, &events, computed_at)?;
                self.repository
                    .replace_agent_aggregates(agent_id, &rows)
                    .await?;
                Ok(rows.len())
            }
        }
    }

    async fn execute(&self, request: RunRequest) -> RunResult {
        let started_at = Utc::now();
        let run_timer = Instant::now();
        let mode = request.mode;

        if let Err(e) = self.repository.health_check().await {
            warn!("存储不可达，放弃本次{}聚合: {}", mode, e);
            return RunResult::fatal(
                mode,
                e.to_string(),
                started_at,
                run_timer.elapsed().as_millis() as u64,
            );
        }

        let agent_ids = match self.resolve_targets(request.targets).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("解析聚合目标失败: {}", e);
                return RunResult::fatal(
                    mode,
                    e.to_string(),
                    started_at,
                    run_timer.elapsed().as_millis() as u64,
                );
            }
        };

        let chunks = plan_chunks(&agent_ids, self.batch_size);
        info!(
            "开始{}聚合: {} 个坐席，{} 个批次",
            mode,
            agent_ids.len(),
            chunks.len()
        );

        let dispatch_timer = Instant::now();
        let mut outcomes = Vec::with_capacity(agent_ids.len());
        for (index, chunk) in chunks.iter().enumerate() {
            debug!("处理第 {} 批，共 {} 个坐席", index + 1, chunk.len());
            let chunk_outcomes =
                join_all(chunk.iter().map(|id| self.process_agent(id, mode))).await;
            outcomes.extend(chunk_outcomes);
        }
        let duration_ms = dispatch_timer.elapsed().as_millis() as u64;

        let (processed_count, errors) = outcomes.into_iter().fold(
            (0usize, Vec::new()),
            |(processed, mut errors), outcome| match outcome {
                AgentOutcome::Processed { .. } => (processed + 1, errors),
                AgentOutcome::Failed(error) => {
                    errors.push(error);
                    (processed, errors)
                }
            },
        );

        let result = RunResult {
            mode,
            success: true,
            processed_count,
            failed_count: errors.len(),
            duration_ms,
            errors,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            "{}聚合完成: 成功 {}，失败 {}，耗时 {}ms",
            mode, result.processed_count, result.failed_count, result.duration_ms
        );
        result
    }
}

#[async_trait]
impl AggregationRunner for AggregationWorker {
    async fn run(&self, request: RunRequest) -> StatsResult<RunResult> {
        let span = info_span!("aggregation_run", mode = %request.mode);
        Ok(self.execute(request).instrument(span).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_chunks_sizes() {
        let ids: Vec<String> = (1..=25).map(|i| format!("A{i}")).collect();
        let sizes: Vec<usize> = plan_chunks(&ids, 10).iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
    }

    #[test]
    fn test_plan_chunks_keeps_order() {
        let ids: Vec<String> = vec!["x".into(), "y".into(), "z".into()];
        let chunks = plan_chunks(&ids, 2);
        assert_eq!(chunks[0], ["x".to_string(), "y".to_string()]);
        assert_eq!(chunks[1], ["z".to_string()]);
    }

    #[test]
    fn test_plan_chunks_edge_cases() {
        assert!(plan_chunks(&[], 10).is_empty());

        let ids: Vec<String> = vec!["a".into(), "b".into()];
        assert_eq!(plan_chunks(&ids, 0).len(), 2);
        assert_eq!(plan_chunks(&ids, 100).len(), 1);
    }
}
