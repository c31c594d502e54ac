//! 推理智能体：识别意图并生成有序执行计划
//!
//! 一次 LLM 调用，回复解析为 [`Plan`] 后逐项校验：
//! - 意图必须是 query / modify / insert 之一
//! - 每步恰好是业务操作（`op`）或工具调用（`tool`），业务操作名必须已知
//! - 步骤声明的实体、参数中的单号 / 订单 ID 必须出现在本轮感知结果或历史上下文中
//! - 依赖（`depends_on` 与参数中的 `$ref`）只能指向更靠前的步骤
//!
//! 任何一项不满足、或后端不可用，都返回 `Reasoning` 错误。工具名不在这里校验，
//! 未注册的工具由执行阶段报告 `UnknownTool`。

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agents::json::parse_json;
use crate::agents::perceiver::looks_like_identifier;
use crate::agents::{as_ref_placeholder, Intent, PerceptionResult, Plan, RawInput, Stage, Step};
use crate::business::{BusinessOperation, VALID_TRANSPORT_STATUSES};
use crate::core::PipelineError;
use crate::llm::LlmClient;
use crate::memory::{Message, PriorContext};
use crate::tools::ToolRegistry;

pub const REASONER_ROLE: &str = "[logistics-reasoner]";

fn system_prompt(tools: &Value) -> String {
    format!(
        r#"{REASONER_ROLE}
你是物流业务推理智能体。根据用户输入、感知到的实体和历史对话，判断意图并生成执行计划。

意图（intent）只能是：
- query：查询运单 / 物流信息
- modify：修改运输状态或物流节点
- insert：新增物流节点

业务操作（op）及参数：
- query_shipment: {{"order_number": "..."}}
- modify_status: {{"order_id" 或 "order_number": "...", "transport_status_name": "{statuses}"}}
- insert_node: {{"order_id": "...", "status_description": "...", "location": "...", "occurred_at": "yyyy-MM-dd", "vehicle_plate"?: "...", "operator"?: "...", "remark"?: "..."}}
- modify_node: {{"order_id": "...", "tracking_id": "...", "location": "...", "occurred_at"?: "yyyy-MM-dd", "status_description"?: "..."}}

可用工具（tool）：
{tools}

规则：
1. 每一步要么是 op，要么是 tool
2. 需要前序步骤的输出时，用 {{"$ref": "steps.<序号>.<字段路径>"}} 作为参数值，或在 depends_on 中写明序号；只能依赖更靠前的步骤
3. entities 与参数中的单号 / 订单 ID 只能取感知结果或历史对话中出现过的值
4. 信息不足以执行时，steps 留空，把需要追问的问题写进 clarifications

只输出 JSON：
{{"intent": "query", "reasoning": "...", "clarifications": [], "steps": [{{"op": "query_shipment", "arguments": {{"order_number": "SF1234567890"}}, "entities": ["SF1234567890"], "depends_on": []}}]}}"#,
        statuses = VALID_TRANSPORT_STATUSES.join(" | "),
        tools = serde_json::to_string_pretty(tools).unwrap_or_else(|_| "[]".into()),
    )
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default, alias = "operation")]
    op: Option<String>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default, alias = "args")]
    arguments: Value,
    #[serde(default)]
    depends_on: Vec<usize>,
    #[serde(default)]
    entities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    intent: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    clarifications: Vec<String>,
    #[serde(default)]
    steps: Vec<RawStep>,
}

/// 取值必须来自用户的参数名
const IDENTIFIER_KEYS: [&str; 4] = ["order_number", "tracking_number", "order_id", "orderNo"];

/// 收集参数中的标识符：标识符字段的取值，以及形如单号 / 手机号的字符串（跳过 `$ref`）
fn collect_identifiers(key: Option<&str>, value: &Value, out: &mut Vec<String>) {
    if as_ref_placeholder(value).is_some() {
        return;
    }
    let keyed = key.is_some_and(|k| IDENTIFIER_KEYS.contains(&k));
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                collect_identifiers(Some(k), v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_identifiers(key, v, out);
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && (keyed || looks_like_identifier(s)) {
                out.push(s.to_string());
            }
        }
        Value::Number(n) if keyed => out.push(n.to_string()),
        _ => {}
    }
}

/// 把 LLM 的原始计划转为经校验的 Plan
fn build_plan(
    raw: RawPlan,
    perception: &PerceptionResult,
    context: &PriorContext,
) -> Result<Plan, String> {
    let intent = Intent::from_str(&raw.intent)?;
    let known = context.known_values();

    let mut steps = Vec::with_capacity(raw.steps.len());
    for (index, s) in raw.steps.into_iter().enumerate() {
        let arguments = if s.arguments.is_null() { json!({}) } else { s.arguments };
        let mut step = match (s.op, s.tool) {
            (Some(op), None) => Step::operation(
                BusinessOperation::from_str(&op).map_err(|e| format!("step {index}: {e}"))?,
                arguments,
            ),
            (None, Some(tool)) if !tool.trim().is_empty() => Step::tool(tool.trim(), arguments),
            _ => return Err(format!("step {index}: must name exactly one of op or tool")),
        };
        for entity in s.entities {
            let value = entity.trim();
            if !perception.contains_value(value) && !known.contains(value) {
                return Err(format!(
                    "step {index} references entity '{value}' that was never perceived"
                ));
            }
            step = step.referencing(value);
        }
        let mut identifiers = Vec::new();
        collect_identifiers(None, step.arguments(), &mut identifiers);
        for value in identifiers {
            if !perception.contains_value(&value) && !known.contains(&value) {
                return Err(format!(
                    "step {index} argument '{value}' was never perceived"
                ));
            }
        }
        step.depends_on = s.depends_on;
        steps.push(step);
    }

    let plan = Plan {
        intent,
        steps,
        reasoning: raw.reasoning,
        clarifications: raw.clarifications,
    };
    plan.check_ordering()?;
    Ok(plan)
}

pub struct ReasonInput {
    pub raw: RawInput,
    pub perception: PerceptionResult,
    pub context: PriorContext,
}

pub struct Reasoner {
    llm: Arc<dyn LlmClient>,
    tools: Option<Arc<ToolRegistry>>,
}

impl Reasoner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, tools: None }
    }

    /// 提示词中列出注册表中的工具
    pub fn with_tools(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.tools = Some(registry);
        self
    }

    pub async fn reason(
        &self,
        raw: &RawInput,
        perception: &PerceptionResult,
        context: &PriorContext,
    ) -> Result<Plan, PipelineError> {
        let tools = self
            .tools
            .as_ref()
            .map(|r| r.describe())
            .unwrap_or_else(|| json!([]));
        let mut messages = vec![Message::system(system_prompt(&tools))];
        messages.extend(context.messages());
        let request = json!({
            "input": raw.prompt_text(),
            "entities": perception.entities,
            "image_description": perception.image_description,
        });
        messages.push(Message::user(request.to_string()));

        let reply = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| PipelineError::Reasoning(format!("backend unavailable: {e}")))?;

        let raw_plan: RawPlan = parse_json(&reply).map_err(PipelineError::Reasoning)?;
        let plan = build_plan(raw_plan, perception, context).map_err(PipelineError::Reasoning)?;
        tracing::info!(
            intent = %plan.intent,
            steps = plan.steps.len(),
            clarifications = plan.clarifications.len(),
            "plan ready"
        );
        Ok(plan)
    }
}

#[async_trait]
impl Stage for Reasoner {
    type Input = ReasonInput;
    type Output = Plan;

    fn name(&self) -> &'static str {
        "reasoner"
    }

    async fn process(&self, input: ReasonInput) -> Result<Plan, PipelineError> {
        self.reason(&input.raw, &input.perception, &input.context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Entity, EntityKind, StepAction};
    use crate::core::ErrorKind;
    use crate::llm::MockLlmClient;

    fn perception(value: &str) -> PerceptionResult {
        PerceptionResult {
            entities: vec![Entity::new(EntityKind::TrackingNumber, value)],
            image_description: None,
        }
    }

    async fn reason_with(reply: &str) -> Result<Plan, PipelineError> {
        let reasoner = Reasoner::new(Arc::new(MockLlmClient::fixed(reply)));
        reasoner
            .reason(
                &RawInput::from_text("SF1234567890 到哪了"),
                &perception("SF1234567890"),
                &PriorContext::default(),
            )
            .await
    }

    #[tokio::test]
    async fn test_query_plan() {
        let plan = reason_with(
            r#"{"intent": "query", "reasoning": "查询运单", "steps": [
                {"op": "query_shipment", "arguments": {"order_number": "SF1234567890"}, "entities": ["SF1234567890"]}
            ]}"#,
        )
        .await
        .unwrap();
        assert_eq!(plan.intent, Intent::Query);
        assert_eq!(plan.steps.len(), 1);
        assert!(matches!(
            plan.steps[0].action,
            StepAction::Operation { op: BusinessOperation::QueryShipment, .. }
        ));
    }

    #[tokio::test]
    async fn test_intent_outside_enum_is_reasoning_error() {
        let err = reason_with(r#"{"intent": "delete", "steps": []}"#).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReasoningError);
    }

    #[tokio::test]
    async fn test_unperceived_entity_rejected() {
        let err = reason_with(
            r#"{"intent": "query", "steps": [
                {"op": "query_shipment", "arguments": {"order_number": "YT9999999999"}, "entities": ["YT9999999999"]}
            ]}"#,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("YT9999999999"));
    }

    #[tokio::test]
    async fn test_unperceived_argument_rejected_without_entities() {
        let err = reason_with(
            r#"{"intent": "query", "steps": [
                {"op": "query_shipment", "arguments": {"order_number": "YT9999999999"}}
            ]}"#,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReasoningError);
        assert!(err.to_string().contains("YT9999999999"));

        // 非标识符字段中的单号同样要求出现过
        let err = reason_with(
            r#"{"intent": "query", "steps": [
                {"tool": "track_lookup", "arguments": {"query": {"numbers": ["JD0012345678901"]}}}
            ]}"#,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("JD0012345678901"));
    }

    #[tokio::test]
    async fn test_ref_arguments_are_not_checked() {
        let plan = reason_with(
            r#"{"intent": "modify", "steps": [
                {"op": "query_shipment", "arguments": {"order_number": "SF1234567890"}},
                {"op": "modify_status", "arguments": {"order_id": {"$ref": "steps.0.order_id"}, "transport_status_name": "已送达"}}
            ]}"#,
        )
        .await
        .unwrap();
        assert_eq!(plan.steps.len(), 2);
    }

    #[tokio::test]
    async fn test_order_id_from_earlier_result_is_allowed() {
        use crate::agents::{ActorResult, DialogOutput};
        use crate::memory::{NewTurn, Turn};
        use chrono::Utc;

        let mut earlier = NewTurn::new(RawInput::from_text("查 SF1234567890"));
        earlier.perception = Some(perception("SF1234567890"));
        earlier.results = Some(vec![ActorResult::Succeeded {
            output: json!({"order_id": 1001, "order_number": "SF1234567890"}),
        }]);
        earlier.dialog = DialogOutput::new("运输中", true, Default::default());
        let context = PriorContext::new(vec![Turn::from_new(1, Utc::now(), earlier)]);

        let reasoner = Reasoner::new(Arc::new(MockLlmClient::fixed(
            r#"{"intent": "insert", "steps": [
                {"op": "insert_node", "arguments": {"order_id": "1001", "status_description": "到达", "location": "天津", "occurred_at": "2024-01-14"}}
            ]}"#,
        )));
        let plan = reasoner
            .reason(&RawInput::from_text("加一个天津的节点"), &PerceptionResult::default(), &context)
            .await
            .unwrap();
        assert_eq!(plan.intent, Intent::Insert);
    }

    #[tokio::test]
    async fn test_forward_reference_rejected() {
        let err = reason_with(
            r#"{"intent": "query", "steps": [
                {"tool": "geocode", "arguments": {"address": {"$ref": "steps.1.current_location"}}},
                {"op": "query_shipment", "arguments": {"order_number": "SF1234567890"}}
            ]}"#,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReasoningError);
    }

    #[tokio::test]
    async fn test_unknown_operation_rejected() {
        let err = reason_with(r#"{"intent": "modify", "steps": [{"op": "delete_order"}]}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("delete_order"));
    }

    #[tokio::test]
    async fn test_context_entities_are_allowed() {
        use crate::agents::DialogOutput;
        use crate::memory::{NewTurn, Turn};
        use chrono::Utc;

        let mut earlier = NewTurn::new(RawInput::from_text("查 SF1234567890"));
        earlier.perception = Some(perception("SF1234567890"));
        earlier.dialog = DialogOutput::new("运输中", true, Default::default());
        let context = PriorContext::new(vec![Turn::from_new(1, Utc::now(), earlier)]);

        let reasoner = Reasoner::new(Arc::new(MockLlmClient::fixed(
            r#"{"intent": "modify", "steps": [
                {"op": "modify_status", "arguments": {"order_number": "SF1234567890", "transport_status_name": "已送达"}, "entities": ["SF1234567890"]}
            ]}"#,
        )));
        let plan = reasoner
            .reason(
                &RawInput::from_text("改成已送达"),
                &PerceptionResult::default(),
                &context,
            )
            .await
            .unwrap();
        assert_eq!(plan.intent, Intent::Modify);
        assert_eq!(plan.steps[0].entities, vec!["SF1234567890".to_string()]);
    }

    #[tokio::test]
    async fn test_backend_failure_is_reasoning_error() {
        let reasoner = Reasoner::new(Arc::new(MockLlmClient::failing("timeout")));
        let err = reasoner
            .reason(&RawInput::from_text("x"), &PerceptionResult::default(), &PriorContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReasoningError);
    }
}
