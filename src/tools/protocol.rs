//! 工具调用协议
//!
//! 请求 `{"tool": name, "arguments": {...}}`；响应 `{"result": {...}}` 或 `{"error": kind, "detail": "..."}`。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResponse {
    Ok { result: Value },
    Err { error: String, detail: String },
}

impl ToolResponse {
    pub fn ok(result: Value) -> Self {
        ToolResponse::Ok { result }
    }

    pub fn err(error: impl Into<String>, detail: impl Into<String>) -> Self {
        ToolResponse::Err {
            error: error.into(),
            detail: detail.into(),
        }
    }
}

/// 工具调用句柄：本地实现或远端能力的代理
///
/// 返回 `Err` 仅表示传输层失败；工具自身的失败通过 `ToolResponse::Err` 表达。
#[async_trait]
pub trait ToolHandle: Send + Sync {
    async fn call(&self, request: ToolRequest) -> Result<ToolResponse, ToolError>;
}
