//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `LOGI__*` 覆盖（双下划线表示嵌套，如 `LOGI__LLM__PROVIDER=openai`）。
//! API Key 不进配置文件，由 `DASHSCOPE_API_KEY` / `OPENAI_API_KEY` 提供。

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub memory: MemorySection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub business: BusinessSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [memory] 段：会话库路径与注入上下文的轮数
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// 每轮注入的历史轮数（有界窗口）
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            context_window: default_context_window(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/sessions.db")
}

fn default_context_window() -> usize {
    5
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：dashscope / openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            temperature: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "dashscope".to_string()
}

fn default_model() -> String {
    "qwen-plus".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [tools] 段：工具超时与远端工具列表
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub remote: Vec<RemoteToolConfig>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            remote: Vec::new(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [[tools.remote]]：按调用协议访问的远端工具
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteToolConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    /// 未配置时接受任意对象
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
}

/// [business] 段：订单服务
#[derive(Debug, Clone, Deserialize)]
pub struct BusinessSection {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_business_timeout")]
    pub timeout_secs: u64,
    /// true 时使用内存订单库（带示例运单）
    #[serde(default)]
    pub offline: bool,
}

impl Default for BusinessSection {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            timeout_secs: default_business_timeout(),
            offline: false,
        }
    }
}

fn default_api_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_business_timeout() -> u64 {
    30
}

/// 从 config 目录加载配置，环境变量 LOGI__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 LOGI__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LOGI")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.memory.context_window, 5);
        assert_eq!(config.llm.provider, "dashscope");
        assert_eq!(config.llm.model, "qwen-plus");
        assert_eq!(config.tools.tool_timeout_secs, 30);
        assert!(!config.business.offline);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[memory]
context_window = 3

[business]
offline = true

[[tools.remote]]
name = "geocode"
url = "http://tools.local/geocode"
"#
        )
        .unwrap();

        let config = load_config(Some(path)).unwrap();
        assert_eq!(config.memory.context_window, 3);
        assert!(config.business.offline);
        assert_eq!(config.tools.remote.len(), 1);
        assert_eq!(config.tools.remote[0].name, "geocode");
        assert!(config.tools.remote[0].input_schema.is_none());
    }
}
