//! 可观测性：结构化日志
//!
//! 默认 info 级别，可通过 RUST_LOG 覆盖（如 `RUST_LOG=logistics_agents=debug`）。
//! 工具调用的审计记录以 `audit` 字段输出，见 [`crate::tools::ToolExecutor`]。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化全局 subscriber；重复调用时忽略
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}
