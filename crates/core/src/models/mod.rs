//! # 数据模型
//!
//! 统计聚合调度的核心数据结构。
//!
//! ## 核心模型
//!
//! ### AgentStatAggregate - 坐席统计聚合行
//! 每个 (坐席, 北京自然日, 分组键) 一行，重新计算时原地覆盖，不追加重复行。
//!
//! ### RawEvent - 原始招聘事件
//! 由外部采集管道写入，聚合时按北京自然日分桶。
//!
//! ### RunResult - 运行结果
//! 每次运行（定时或手动）结束时产生，生成后不可变。
//!
//! ### SchedulerStatus - 调度器状态快照
//! 只读快照，供运维接口查询。
//!
//! ## 设计原则
//!
//! - 所有时间字段使用 `DateTime<Utc>`，分桶日期使用北京时间的 `NaiveDate`
//! - 单个坐席的失败以 `AgentError` 记录在结果中，不以错误形式向上传播

pub mod aggregate;
pub mod run;

pub use aggregate::*;
pub use run::*;
