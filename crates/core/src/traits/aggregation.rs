use async_trait::async_trait;

use crate::{
    models::{RunRequest, RunResult},
    StatsResult,
};

/// 聚合执行接口
///
/// 单个坐席的失败必须记录在 `RunResult` 中；返回 `Err` 表示执行器自身故障，
/// 由调度器转换为失败的运行结果。
#[async_trait]
pub trait AggregationRunner: Send + Sync {
    async fn run(&self, request: RunRequest) -> StatsResult<RunResult>;
}
