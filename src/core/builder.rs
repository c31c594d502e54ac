//! 服务装配：按配置选择 LLM 后端、会话存储、订单服务并注册工具
//!
//! `llm.provider = "mock"` 或 `business.offline = true` 时使用离线组件：
//! 规则驱动的 Mock 后端 + 内存订单库（含示例运单），无需任何 API Key。

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::agents::{
    extract_rule_entities, Actor, Dialog, EntityKind, Perceiver, Reasoner, DIALOG_ROLE,
    PERCEIVER_ROLE, REASONER_ROLE,
};
use crate::business::{
    BusinessOperations, HttpOrderService, InMemoryShipments, VALID_TRANSPORT_STATUSES,
};
use crate::config::AppConfig;
use crate::core::LogisticsService;
use crate::llm::{create_dashscope_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{last_content, Message, MemoryStore, Role, SqliteMemoryStore, StorageError};
use crate::tools::schema::any_object;
use crate::tools::{
    AddressMatchTool, HttpToolHandle, ToolExecutor, ToolRegistry, ToolSchema, ADDRESS_MATCH_TOOL,
};

/// 最近一个出现过的单号：先看本轮输入，再倒序看历史消息
fn latest_tracking_number(messages: &[Message], input: &str) -> Option<String> {
    let from_input = extract_rule_entities(input)
        .into_iter()
        .find(|e| e.kind == EntityKind::TrackingNumber);
    if let Some(entity) = from_input {
        return Some(entity.value);
    }
    messages
        .iter()
        .rev()
        .filter(|m| m.role != Role::System)
        .flat_map(|m| extract_rule_entities(&m.content))
        .find(|e| e.kind == EntityKind::TrackingNumber)
        .map(|e| e.value)
}

fn offline_plan(messages: &[Message], request: &str) -> Value {
    let request: Value = serde_json::from_str(request).unwrap_or(Value::Null);
    let input = request["input"].as_str().unwrap_or_default();
    let history = &messages[..messages.len().saturating_sub(1)];

    let Some(number) = latest_tracking_number(history, input) else {
        return json!({
            "intent": "query",
            "reasoning": "no tracking number in input or history",
            "clarifications": ["请提供需要查询的运单号"],
            "steps": []
        });
    };

    let status = VALID_TRANSPORT_STATUSES
        .iter()
        .find(|s| input.contains(*s) && (input.contains("改") || input.contains("更新")));
    match status {
        Some(status) => json!({
            "intent": "modify",
            "reasoning": format!("update {number} to {status}"),
            "steps": [{
                "op": "modify_status",
                "arguments": {"order_number": number, "transport_status_name": status},
                "entities": [number]
            }]
        }),
        None => json!({
            "intent": "query",
            "reasoning": format!("look up {number}"),
            "steps": [{
                "op": "query_shipment",
                "arguments": {"order_number": number},
                "entities": [number]
            }]
        }),
    }
}

/// 离线后端：按系统提示首行的角色标记分派
pub fn offline_reply(messages: &[Message]) -> Result<String, String> {
    let system = messages
        .iter()
        .find(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .unwrap_or_default();
    let request = last_content(messages, Role::User).unwrap_or_default();

    if system.starts_with(PERCEIVER_ROLE) {
        // 实体由规则抽取补齐
        Ok(json!({"entities": []}).to_string())
    } else if system.starts_with(REASONER_ROLE) {
        Ok(offline_plan(messages, request).to_string())
    } else if system.starts_with(DIALOG_ROLE) {
        Err("offline dialog uses templates".to_string())
    } else {
        Err("offline backend: unrecognized prompt".to_string())
    }
}

fn is_offline(config: &AppConfig) -> bool {
    config.llm.provider.eq_ignore_ascii_case("mock") || config.business.offline
}

/// 按配置构建 [`LogisticsService`]；各组件可单独替换（测试用）
pub struct ServiceBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    store: Option<Arc<dyn MemoryStore>>,
    business: Option<Arc<dyn BusinessOperations>>,
    registry: Option<Arc<ToolRegistry>>,
}

impl ServiceBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            store: None,
            business: None,
            registry: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_business(mut self, business: Arc<dyn BusinessOperations>) -> Self {
        self.business = Some(business);
        self
    }

    /// 使用外部注册表；address_match 未注册时仍会补上
    pub fn with_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn build_registry(&self) -> Arc<ToolRegistry> {
        let registry = self
            .registry
            .clone()
            .unwrap_or_else(|| Arc::new(ToolRegistry::new()));
        if !registry.contains(ADDRESS_MATCH_TOOL) {
            registry.register(ADDRESS_MATCH_TOOL, AddressMatchTool::schema(), AddressMatchTool);
        }
        for remote in &self.config.tools.remote {
            let schema = ToolSchema::new(
                remote.description.clone(),
                remote.input_schema.clone().unwrap_or_else(any_object),
                remote.output_schema.clone().unwrap_or_else(any_object),
            );
            let handle = HttpToolHandle::new(remote.url.clone(), self.config.tools.tool_timeout_secs);
            if registry.register(&remote.name, schema, handle).is_some() {
                tracing::warn!(tool = %remote.name, "remote tool replaced an existing registration");
            }
            tracing::info!(tool = %remote.name, url = %remote.url, "remote tool registered");
        }
        registry
    }

    fn build_llm(&self) -> (Arc<dyn LlmClient>, Dialog) {
        if let Some(llm) = &self.llm {
            return (llm.clone(), Dialog::new(Some(llm.clone())));
        }
        let section = &self.config.llm;
        let timeout = Duration::from_secs(section.timeouts.request);
        if is_offline(&self.config) {
            tracing::info!("using offline rule-based backend");
            let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::from_fn(offline_reply));
            return (llm, Dialog::templated());
        }
        let client = match section.provider.to_lowercase().as_str() {
            "openai" => {
                let api_key = std::env::var("OPENAI_API_KEY").ok();
                OpenAiClient::new(section.base_url.as_deref(), &section.model, api_key.as_deref())
            }
            other => {
                if other != "dashscope" {
                    tracing::warn!(provider = other, "unknown llm provider, falling back to dashscope");
                }
                create_dashscope_client(Some(&section.model), section.base_url.as_deref())
            }
        };
        let client = match section.temperature {
            Some(t) => client.with_temperature(t),
            None => client,
        }
        .with_request_timeout(timeout);
        tracing::info!(provider = %section.provider, model = %client.model(), "llm backend ready");
        let llm: Arc<dyn LlmClient> = Arc::new(client);
        (llm.clone(), Dialog::new(Some(llm)))
    }

    pub async fn build(self) -> Result<LogisticsService, StorageError> {
        let registry = self.build_registry();
        let (llm, dialog) = self.build_llm();

        let store: Arc<dyn MemoryStore> = match &self.store {
            Some(store) => store.clone(),
            None => Arc::new(SqliteMemoryStore::new(&self.config.memory.db_path).await?),
        };

        let business: Arc<dyn BusinessOperations> = match &self.business {
            Some(business) => business.clone(),
            None if is_offline(&self.config) => Arc::new(InMemoryShipments::with_samples()),
            None => Arc::new(HttpOrderService::new(
                self.config.business.api_base_url.clone(),
                self.config.business.timeout_secs,
            )),
        };

        let executor = Arc::new(ToolExecutor::new(
            registry.clone(),
            self.config.tools.tool_timeout_secs,
        ));
        tracing::info!(tools = ?executor.tool_names(), "tool registry ready");

        Ok(LogisticsService::new(
            store,
            Perceiver::new(llm.clone()),
            Reasoner::new(llm).with_tools(registry),
            Actor::new(executor, business),
            dialog,
            self.config.memory.context_window,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::RawInput;
    use crate::memory::InMemoryStore;

    fn offline_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.provider = "mock".into();
        config.business.offline = true;
        config
    }

    #[test]
    fn test_offline_reply_dispatches_on_role() {
        let perceive = [Message::system(format!("{PERCEIVER_ROLE}\n...")), Message::user("hi")];
        assert!(offline_reply(&perceive).unwrap().contains("entities"));

        let dialog = [Message::system(format!("{DIALOG_ROLE}\n...")), Message::user("hi")];
        assert!(offline_reply(&dialog).is_err());
    }

    #[test]
    fn test_offline_plan_uses_history() {
        let messages = [
            Message::system(format!("{REASONER_ROLE}\n...")),
            Message::user("查一下 SF1234567890"),
            Message::assistant("📦 运单 SF1234567890"),
            Message::user(json!({"input": "改为已送达", "entities": []}).to_string()),
        ];
        let plan: Value = serde_json::from_str(&offline_reply(&messages).unwrap()).unwrap();
        assert_eq!(plan["intent"], "modify");
        assert_eq!(plan["steps"][0]["arguments"]["order_number"], "SF1234567890");
        assert_eq!(plan["steps"][0]["arguments"]["transport_status_name"], "已送达");
    }

    #[test]
    fn test_offline_plan_asks_for_number() {
        let messages = [
            Message::system(format!("{REASONER_ROLE}\n...")),
            Message::user(json!({"input": "我的快递到哪了", "entities": []}).to_string()),
        ];
        let plan: Value = serde_json::from_str(&offline_reply(&messages).unwrap()).unwrap();
        assert_eq!(plan["steps"].as_array().unwrap().len(), 0);
        assert_eq!(plan["clarifications"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_build_offline_service() {
        let service = ServiceBuilder::new(offline_config())
            .with_store(Arc::new(InMemoryStore::new()))
            .build()
            .await
            .unwrap();

        let envelope = service
            .handle_turn("s-1", RawInput::from_text("帮我查一下运单 SF1234567890"))
            .await;
        assert!(envelope.success, "{}", envelope.message);
        assert!(envelope.message.contains("SF1234567890"));
        assert_eq!(envelope.data["seq"], 1);
    }
}
