//! 流水线错误类型与错误种类
//!
//! `ErrorKind` 是对外可见的闭合分类（写入 ActorResult、Turn 与响应 envelope）；
//! `PipelineError` 是阶段内部向编排器传播的基础设施错误，编排器据此合成失败回复。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::business::BusinessError;
use crate::memory::StorageError;
use crate::tools::ToolError;

/// 错误种类（闭合枚举，序列化为 PascalCase 名称）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    PerceptionBackendError,
    ReasoningError,
    InvalidToolArguments,
    UnknownTool,
    SkippedDueToDependency,
    ActorOperationError,
    StorageUnavailable,
    ValidationError,
    /// 远端工具返回 `{error, detail}` 或调用超时
    ToolInvocationError,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PerceptionBackendError => "PerceptionBackendError",
            ErrorKind::ReasoningError => "ReasoningError",
            ErrorKind::InvalidToolArguments => "InvalidToolArguments",
            ErrorKind::UnknownTool => "UnknownTool",
            ErrorKind::SkippedDueToDependency => "SkippedDueToDependency",
            ErrorKind::ActorOperationError => "ActorOperationError",
            ErrorKind::StorageUnavailable => "StorageUnavailable",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::ToolInvocationError => "ToolInvocationError",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 中止流水线的基础设施错误（业务失败不走这里，而是落在 ActorResult 中）
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Perception backend error: {0}")]
    PerceptionBackend(String),

    #[error("Reasoning error: {0}")]
    Reasoning(String),

    #[error("Storage unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Turn cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::PerceptionBackend(_) => ErrorKind::PerceptionBackendError,
            PipelineError::Reasoning(_) => ErrorKind::ReasoningError,
            PipelineError::Storage(_) => ErrorKind::StorageUnavailable,
            PipelineError::Validation(_) => ErrorKind::ValidationError,
            PipelineError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::UnknownTool(_) => ErrorKind::UnknownTool,
            ToolError::InvalidArguments { .. } => ErrorKind::InvalidToolArguments,
            ToolError::Remote { .. } | ToolError::Timeout(_) | ToolError::Transport(_) => {
                ErrorKind::ToolInvocationError
            }
        }
    }
}

impl BusinessError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ActorOperationError
    }
}
