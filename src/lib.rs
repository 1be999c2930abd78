//! 坐席招聘统计聚合服务
//!
//! 进程入口使用的组装代码：应用组装和优雅关闭。

pub mod app;
pub mod shutdown;

pub use app::Application;
pub use shutdown::ShutdownManager;
