//! 工具注册表
//!
//! 按名注册工具（Schema + 调用句柄），调用前按输入 Schema 校验参数。
//! 同名重复注册视为替换；已在途的调用继续使用旧句柄完成。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{json, Value};

use crate::tools::{ToolError, ToolHandle, ToolRequest, ToolResponse, ToolSchema};

/// 已注册工具
pub struct RegisteredTool {
    pub name: String,
    pub schema: ToolSchema,
    handle: Arc<dyn ToolHandle>,
}

impl RegisteredTool {
    /// 校验参数并调用句柄
    pub async fn invoke(&self, arguments: Value) -> Result<Value, ToolError> {
        self.schema
            .validate_input(&arguments)
            .map_err(|reason| ToolError::InvalidArguments {
                tool: self.name.clone(),
                reason,
            })?;

        let request = ToolRequest {
            tool: self.name.clone(),
            arguments,
        };
        match self.handle.call(request).await? {
            ToolResponse::Ok { result } => {
                if let Err(reason) = self.schema.validate_output(&result) {
                    tracing::warn!(tool = %self.name, %reason, "tool result does not match declared schema");
                }
                Ok(result)
            }
            ToolResponse::Err { error, detail } if error == "InvalidToolArguments" => {
                Err(ToolError::InvalidArguments {
                    tool: self.name.clone(),
                    reason: detail,
                })
            }
            ToolResponse::Err { error, detail } => Err(ToolError::Remote {
                tool: self.name.clone(),
                kind: error,
                detail,
            }),
        }
    }
}

/// 工具注册表：运行期可并发注册与调用
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<RegisteredTool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具，返回被替换的旧条目（如有）
    pub fn register(
        &self,
        name: impl Into<String>,
        schema: ToolSchema,
        handle: impl ToolHandle + 'static,
    ) -> Option<Arc<RegisteredTool>> {
        self.register_arc(name, schema, Arc::new(handle))
    }

    pub fn register_arc(
        &self,
        name: impl Into<String>,
        schema: ToolSchema,
        handle: Arc<dyn ToolHandle>,
    ) -> Option<Arc<RegisteredTool>> {
        let name = name.into();
        let entry = Arc::new(RegisteredTool {
            name: name.clone(),
            schema,
            handle,
        });
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        let previous = tools.insert(name.clone(), entry);
        if previous.is_some() {
            tracing::info!(tool = %name, "tool registration replaced");
        } else {
            tracing::debug!(tool = %name, "tool registered");
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 已注册工具名（按字典序）
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// 工具清单 JSON，用于 Reasoner 提示词
    pub fn describe(&self) -> Value {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<&Arc<RegisteredTool>> = tools.values().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Value::Array(
            entries
                .into_iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.schema.description,
                        "parameters": t.schema.input,
                    })
                })
                .collect(),
        )
    }

    /// 按名调用；未注册返回 UnknownTool
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.invoke(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Upper;

    #[async_trait]
    impl ToolHandle for Upper {
        async fn call(&self, request: ToolRequest) -> Result<ToolResponse, ToolError> {
            let text = request.arguments["text"].as_str().unwrap_or_default();
            Ok(ToolResponse::ok(json!({"text": text.to_uppercase()})))
        }
    }

    struct Rejecting;

    #[async_trait]
    impl ToolHandle for Rejecting {
        async fn call(&self, _request: ToolRequest) -> Result<ToolResponse, ToolError> {
            Ok(ToolResponse::err("NotFound", "no such poi"))
        }
    }

    fn text_schema() -> ToolSchema {
        ToolSchema::new(
            "upper-case text",
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
            json!({"type": "object"}),
        )
    }

    #[tokio::test]
    async fn test_invoke_registered_tool() {
        let registry = ToolRegistry::new();
        registry.register("upper", text_schema(), Upper);
        let out = registry.invoke("upper", json!({"text": "sf"})).await.unwrap();
        assert_eq!(out, json!({"text": "SF"}));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.invoke("geocode", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(name) if name == "geocode"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected_before_call() {
        let registry = ToolRegistry::new();
        registry.register("upper", text_schema(), Upper);
        let err = registry.invoke("upper", json!({"text": 3})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_remote_error_surfaces_kind() {
        let registry = ToolRegistry::new();
        registry.register("poi", ToolSchema::new("poi", json!({}), json!({})), Rejecting);
        match registry.invoke("poi", json!({})).await.unwrap_err() {
            ToolError::Remote { kind, detail, .. } => {
                assert_eq!(kind, "NotFound");
                assert_eq!(detail, "no such poi");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_replacement_keeps_in_flight_handle() {
        let registry = ToolRegistry::new();
        assert!(registry.register("upper", text_schema(), Upper).is_none());
        let old = registry.get("upper").unwrap();
        assert!(registry.register("upper", text_schema(), Rejecting).is_some());

        assert!(old.invoke(json!({"text": "a"})).await.is_ok());
        assert!(registry.invoke("upper", json!({"text": "a"})).await.is_err());
        assert_eq!(registry.tool_names(), vec!["upper".to_string()]);
    }
}
