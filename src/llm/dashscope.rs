//! DashScope（通义千问）客户端（OpenAI 兼容模式）
//!
//! - Base URL: https://dashscope.aliyuncs.com/compatible-mode/v1
//! - 默认模型: qwen-plus

use crate::llm::OpenAiClient;

pub const DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const QWEN_PLUS: &str = "qwen-plus";

/// 创建 DashScope 客户端
///
/// - 优先使用环境变量 `DASHSCOPE_API_KEY`，其次 `OPENAI_API_KEY`
/// - base_url 为空时使用官方兼容模式地址
pub fn create_dashscope_client(model: Option<&str>, base_url: Option<&str>) -> OpenAiClient {
    let api_key = std::env::var("DASHSCOPE_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .unwrap_or_else(|| "sk-placeholder".to_string());

    let model = model.filter(|m| !m.is_empty()).unwrap_or(QWEN_PLUS);
    let base_url = base_url.filter(|u| !u.is_empty()).unwrap_or(DASHSCOPE_BASE_URL);

    OpenAiClient::new(Some(base_url), model, Some(api_key.as_str()))
}
