//! 物流对话多智能体流水线
//!
//! 模块划分：
//! - **agents**: 流水线数据模型与四个阶段（感知、推理、执行、对话）
//! - **business**: 订单服务操作（运单查询、状态修改、物流节点）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、状态机、会话监管、编排器与服务装配
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DashScope / Mock）
//! - **memory**: 会话与轮次记录、内存 / SQLite 存储
//! - **observability**: 日志初始化
//! - **tools**: 工具注册表、调用协议、执行器与内置地址匹配工具

pub mod agents;
pub mod business;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;

pub use crate::core::{LogisticsService, ServiceBuilder};
