use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{StatsError, StatsResult};

/// 统计聚合调度配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 增量（脏坐席）聚合间隔（毫秒）
    pub dirty_interval_ms: u64,
    /// 每日全量聚合的北京时间整点（0-23）
    pub main_aggregation_hour: u32,
    /// 单个批次最多处理的坐席数
    pub batch_size: usize,
    /// 总开关
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dirty_interval_ms: 300_000,
            main_aggregation_hour: 2,
            batch_size: 50,
            enabled: true,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> StatsResult<()> {
        if self.dirty_interval_ms == 0 {
            return Err(StatsError::config_error("增量聚合间隔必须大于0"));
        }

        if self.main_aggregation_hour > 23 {
            return Err(StatsError::config_error(format!(
                "每日聚合整点必须在0-23之间，当前值: {}",
                self.main_aggregation_hour
            )));
        }

        if self.batch_size == 0 {
            return Err(StatsError::config_error("批次大小必须大于0"));
        }

        Ok(())
    }

    pub fn dirty_interval(&self) -> Duration {
        Duration::from_millis(self.dirty_interval_ms)
    }
}
