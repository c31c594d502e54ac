//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DashScope / Mock）

pub mod dashscope;
pub mod mock;
pub mod openai;
pub mod traits;

pub use dashscope::{create_dashscope_client, DASHSCOPE_BASE_URL, QWEN_PLUS};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::LlmClient;
