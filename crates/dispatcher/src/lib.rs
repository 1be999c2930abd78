//! 统计聚合调度器
//!
//! 两个定时器和手动触发都汇入同一个单飞门控，任意时刻最多只有一次聚合运行。

pub mod scheduler;
pub mod timers;

pub use scheduler::StatsScheduler;
pub use timers::Trigger;
