//! 配置管理
//!
//! 配置按以下顺序加载，后者覆盖前者：
//!
//! 1. 内置默认值
//! 2. TOML 配置文件
//! 3. 环境变量（前缀 `STATS_`，层级分隔符 `__`，如 `STATS_SCHEDULER__BATCH_SIZE=20`）
//!
//! 调度器配置在启动时确定，进程生命周期内只读，修改需要重启调度器。

pub mod models;

pub use models::*;
