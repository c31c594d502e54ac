//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DashScope / Mock）实现 LlmClient。各阶段只依赖此 trait。

use async_trait::async_trait;

use crate::memory::Message;

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；Err 为后端错误描述
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;
}
