//! 流水线阶段抽象
//!
//! 四个角色（感知 / 推理 / 执行 / 对话）都实现 [`Stage`]，由编排器按固定顺序组合。

use async_trait::async_trait;

use crate::core::PipelineError;

#[async_trait]
pub trait Stage: Send + Sync {
    type Input: Send;
    type Output: Send;

    /// 日志与状态投影中使用的阶段名
    fn name(&self) -> &'static str;

    async fn process(&self, input: Self::Input) -> Result<Self::Output, PipelineError>;
}
