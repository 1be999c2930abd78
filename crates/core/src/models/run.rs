use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;

/// 调度层故障在结果中使用的坐席占位符
pub const WILDCARD_AGENT_ID: &str = "*";

/// 聚合模式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// 只处理脏坐席，只重算最近的分桶
    Incremental,
    /// 从原始数据重建目标坐席的全部历史分桶
    Full,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Incremental => "incremental",
            RunMode::Full => "full",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 运行目标
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunTargets {
    /// 显式指定的坐席列表
    Agents(Vec<String>),
    /// 存储中已知的全部坐席，在存储可达性检查通过后再解析
    AllKnown,
}

impl RunTargets {
    pub fn explicit_agents(&self) -> Option<&[String]> {
        match self {
            RunTargets::Agents(ids) => Some(ids),
            RunTargets::AllKnown => None,
        }
    }
}

/// 一次聚合运行的请求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRequest {
    pub mode: RunMode,
    pub targets: RunTargets,
}

impl RunRequest {
    pub fn incremental(agent_ids: Vec<String>) -> Self {
        Self {
            mode: RunMode::Incremental,
            targets: RunTargets::Agents(agent_ids),
        }
    }

    pub fn full_for(agent_id: impl Into<String>) -> Self {
        Self {
            mode: RunMode::Full,
            targets: RunTargets::Agents(vec![agent_id.into()]),
        }
    }

    pub fn full_all() -> Self {
        Self {
            mode: RunMode::Full,
            targets: RunTargets::AllKnown,
        }
    }
}

/// 单个坐席的失败记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentError {
    pub agent_id: String,
    pub message: String,
}

/// 一次运行的结果，生成后不可变
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub mode: RunMode,
    /// 只有运行级致命错误时为 false，部分坐席失败不影响
    pub success: bool,
    pub processed_count: usize,
    pub failed_count: usize,
    pub duration_ms: u64,
    pub errors: Vec<AgentError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    /// 运行级致命错误，没有处理任何坐席
    pub fn fatal(
        mode: RunMode,
        message: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        Self {
            mode,
            success: false,
            processed_count: 0,
            failed_count: 0,
            duration_ms,
            errors: vec![AgentError {
                agent_id: WILDCARD_AGENT_ID.to_string(),
                message: message.into(),
            }],
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn total_count(&self) -> usize {
        self.processed_count + self.failed_count
    }
}

/// 调度器状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    /// 定时器是否已启动
    pub started: bool,
    pub last_run_time: Option<DateTime<Utc>>,
    pub next_main_aggregation_time: Option<DateTime<Utc>>,
    pub config: SchedulerConfig,
    pub last_run_result: Option<RunResult>,
    pub dirty_count: usize,
}
