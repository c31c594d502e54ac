//! 远端工具：按调用协议 POST 到配置的 URL

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::tools::{ToolError, ToolHandle, ToolRequest, ToolResponse};

pub struct HttpToolHandle {
    client: Client,
    url: String,
}

/// 带整体超时的 HTTP 客户端；TLS 后端初始化失败时退回默认配置并告警
pub(crate) fn http_client(timeout: Duration) -> Client {
    match Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, ?timeout, "http client build failed, using defaults without timeout");
            Client::new()
        }
    }
}

impl HttpToolHandle {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: http_client(Duration::from_secs(timeout_secs)),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ToolHandle for HttpToolHandle {
    async fn call(&self, request: ToolRequest) -> Result<ToolResponse, ToolError> {
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ToolError::Transport(format!("{}: {e}", request.tool)))?;
        let status = response.status();
        if !status.is_success() {
            // 协议错误体可能随非 2xx 返回
            return match response.json::<ToolResponse>().await {
                Ok(body @ ToolResponse::Err { .. }) => Ok(body),
                _ => Err(ToolError::Transport(format!("{}: HTTP {status}", request.tool))),
            };
        }
        response
            .json::<ToolResponse>()
            .await
            .map_err(|e| ToolError::Transport(format!("{}: malformed response: {e}", request.tool)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let handle = HttpToolHandle::new(format!("http://127.0.0.1:{port}/tool"), 2);
        let err = handle
            .call(ToolRequest {
                tool: "geocode".into(),
                arguments: json!({"address": "北京"}),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Transport(ref msg) if msg.starts_with("geocode")));
    }
}
