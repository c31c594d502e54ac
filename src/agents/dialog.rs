//! 对话智能体：把执行结果渲染为用户可读的回复
//!
//! 配置了 LLM 时先让模型生成回复；模型失败或返回空文本时使用确定性模板。
//! `success` 当且仅当所有步骤成功；`data` 只包含成功步骤的精简输出（去除 null 字段）。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::agents::{ActorResult, DialogOutput, Plan, Stage, Step, StepAction};
use crate::business::BusinessOperation;
use crate::core::{ErrorKind, PipelineError};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::tools::ADDRESS_MATCH_TOOL;

pub const DIALOG_ROLE: &str = "[logistics-dialog]";

const SYSTEM_PROMPT: &str = r#"[logistics-dialog]
你是专业的物流客服助手，负责把系统执行结果转换为友好、简洁的中文回复。
- 使用 emoji 增强可读性（📦 查询结果、✅ 成功、🤔 需要补充信息、❌ 失败）
- 查询结果必须写出订单号、当前状态、当前位置与物流轨迹
- 操作失败时说明原因并给出建议
- 信息不足时逐条列出需要用户补充的问题
- 不要编造执行结果中没有的信息"#;

/// 递归去除 null 字段
pub fn compact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), compact(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(compact).collect()),
        other => other.clone(),
    }
}

fn field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn order_number<'a>(step: &'a Step, output: &'a Value) -> &'a str {
    field(output, &["order_number", "orderNumber", "orderNo"])
        .or_else(|| field(step.arguments(), &["order_number", "tracking_number", "order_id"]))
        .unwrap_or("未知")
}

fn render_shipment(step: &Step, output: &Value) -> String {
    let mut lines = vec![
        format!("📦 订单号: {}", order_number(step, output)),
        String::new(),
        format!(
            "当前状态: {} 🚚",
            field(output, &["status", "transportStatusName"]).unwrap_or("未知")
        ),
        format!(
            "当前位置: {}",
            field(output, &["current_location", "currentLocation"]).unwrap_or("未知")
        ),
        format!(
            "预计送达: {}",
            field(output, &["estimated_delivery", "estimatedDelivery"]).unwrap_or("未知")
        ),
    ];
    if let Some(history) = output.get("history").and_then(Value::as_array) {
        if !history.is_empty() {
            lines.push(String::new());
            lines.push("物流轨迹:".into());
            for item in history {
                lines.push(format!(
                    "• {} {} - {}",
                    field(item, &["time"]).unwrap_or(""),
                    field(item, &["location"]).unwrap_or(""),
                    field(item, &["status"]).unwrap_or(""),
                ));
            }
        }
    }
    lines.join("\n")
}

fn render_success(step: &Step, output: &Value) -> String {
    match &step.action {
        StepAction::Operation { op: BusinessOperation::QueryShipment, .. } => {
            render_shipment(step, output)
        }
        StepAction::Operation { op: BusinessOperation::ModifyStatus, arguments } => format!(
            "✅ 修改成功！\n\n订单号: {}\n状态已更新为: {}",
            order_number(step, output),
            field(output, &["transport_status_name"])
                .or_else(|| field(arguments, &["transport_status_name", "target_status", "status"]))
                .unwrap_or("未知"),
        ),
        StepAction::Operation { op: BusinessOperation::InsertNode, .. } => {
            let mut text = format!(
                "✅ 物流节点已添加\n\n订单号: {}\n新节点: {}\n时间: {}",
                order_number(step, output),
                field(output, &["location"]).unwrap_or("未知"),
                field(output, &["occurred_at"]).unwrap_or("未知"),
            );
            if let Some(plate) = field(output, &["vehicle_plate"]) {
                text.push_str(&format!("\n车牌: {plate}"));
            }
            text
        }
        StepAction::Operation { op: BusinessOperation::ModifyNode, .. } => format!(
            "✅ 物流节点已更新\n\n订单号: {}\n节点位置: {}",
            order_number(step, output),
            field(output, &["location"]).unwrap_or("未知"),
        ),
        StepAction::Tool { tool, .. } if tool == ADDRESS_MATCH_TOOL => {
            let rec = &output["recommendation"];
            match field(rec, &["action"]) {
                Some("similar_address") => format!(
                    "📍 找到相同位置的地址: {}（置信度 {:.2}）",
                    field(rec, &["suggested_address_text"]).unwrap_or("未知"),
                    rec["overall_confidence"].as_f64().unwrap_or_default(),
                ),
                _ => "📍 没有找到相同位置的地址，建议作为新地址录入".to_string(),
            }
        }
        StepAction::Tool { tool, .. } => format!("✅ {tool} 执行成功"),
    }
}

fn failure_reason(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::UnknownTool => "所需的工具尚未接入",
        ErrorKind::InvalidToolArguments => "工具参数不符合要求",
        ErrorKind::SkippedDueToDependency => "前置步骤未成功，本步已跳过",
        ErrorKind::ActorOperationError => "业务操作未成功",
        ErrorKind::ToolInvocationError => "外部服务调用失败",
        ErrorKind::Cancelled => "操作已取消",
        _ => "处理过程中出现问题",
    }
}

fn render_failure(step: &Step, kind: ErrorKind, message: &str) -> String {
    format!(
        "❌ 操作失败（{}）\n\n原因: {}: {}\n\n建议:\n• 检查订单号是否正确\n• 稍后重试或联系人工客服",
        step.label(),
        failure_reason(kind),
        message
    )
}

/// 确定性模板回复（永不为空）
pub fn template_reply(plan: &Plan, results: &[ActorResult]) -> String {
    if plan.steps.is_empty() {
        if plan.clarifications.is_empty() {
            return "🤔 我还不太确定您需要什么帮助，可以提供运单号或具体需求吗？".to_string();
        }
        let mut lines = vec!["🤔 为了帮您完成操作，还需要一些信息：".to_string(), String::new()];
        lines.extend(plan.clarifications.iter().map(|q| format!("❓ {q}")));
        lines.push(String::new());
        lines.push("请提供以上信息，我将立即为您处理。".into());
        return lines.join("\n");
    }

    let mut sections: Vec<String> = plan
        .steps
        .iter()
        .zip(results)
        .map(|(step, result)| match result {
            ActorResult::Succeeded { output } => render_success(step, output),
            ActorResult::Failed { kind, message } => render_failure(step, *kind, message),
        })
        .collect();
    if sections.is_empty() {
        sections.push("❌ 操作未执行".into());
    }
    let closing = if results.iter().all(ActorResult::is_success) {
        "还需要其他帮助吗？"
    } else {
        "需要其他帮助吗？"
    };
    sections.push(closing.to_string());
    sections.join("\n\n")
}

/// envelope 中的 data：意图 + 成功步骤的精简输出（按步骤序号）
pub fn result_data(plan: &Plan, results: &[ActorResult]) -> Map<String, Value> {
    let steps: Map<String, Value> = results
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.output().map(|o| (i.to_string(), compact(o))))
        .collect();
    let mut data = Map::new();
    data.insert("intent".into(), json!(plan.intent));
    data.insert("steps".into(), Value::Object(steps));
    data
}

/// 基础设施失败时合成的回复
pub fn synthesize_failure(kind: ErrorKind, detail: &str) -> DialogOutput {
    let text = match kind {
        ErrorKind::PerceptionBackendError | ErrorKind::ReasoningError => {
            "抱歉，暂时无法理解您的请求，请稍后重试。".to_string()
        }
        ErrorKind::StorageUnavailable => "抱歉，会话服务暂时不可用，请稍后重试。".to_string(),
        ErrorKind::ValidationError => format!("请求无效: {detail}"),
        ErrorKind::Cancelled => "请求已取消。".to_string(),
        _ => "抱歉，处理您的请求时遇到了问题。".to_string(),
    };
    let mut data = Map::new();
    data.insert("error".into(), json!(kind));
    data.insert("detail".into(), json!(detail));
    DialogOutput::new(format!("❌ {text}"), false, data)
}

pub struct RenderInput {
    pub plan: Plan,
    pub results: Vec<ActorResult>,
}

pub struct Dialog {
    llm: Option<Arc<dyn LlmClient>>,
}

impl Dialog {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { llm }
    }

    /// 仅模板渲染
    pub fn templated() -> Self {
        Self { llm: None }
    }

    fn dialog_input(plan: &Plan, results: &[ActorResult]) -> String {
        let mut parts = vec![format!("## 用户意图: {}", plan.intent)];
        if !plan.reasoning.is_empty() {
            parts.push(format!("\n## 推理过程:\n{}", plan.reasoning));
        }
        if !plan.clarifications.is_empty() {
            parts.push("\n## 需要向用户询问的问题:".into());
            for (i, q) in plan.clarifications.iter().enumerate() {
                parts.push(format!("{}. {q}", i + 1));
            }
        }
        if !results.is_empty() {
            let executed: Vec<Value> = plan
                .steps
                .iter()
                .zip(results)
                .map(|(step, result)| json!({"step": step.label(), "result": result}))
                .collect();
            parts.push("\n## 执行结果:\n```json".into());
            parts.push(serde_json::to_string_pretty(&executed).unwrap_or_default());
            parts.push("```".into());
        }
        parts.push("\n请根据以上信息，生成用户友好的回复。".into());
        parts.join("\n")
    }

    pub async fn render(&self, plan: &Plan, results: &[ActorResult]) -> DialogOutput {
        let success = results.iter().all(ActorResult::is_success);
        let data = result_data(plan, results);

        let generated = match &self.llm {
            Some(llm) => {
                let messages = [
                    Message::system(SYSTEM_PROMPT),
                    Message::user(Self::dialog_input(plan, results)),
                ];
                match llm.complete(&messages).await {
                    Ok(reply) if !reply.trim().is_empty() => Some(reply.trim().to_string()),
                    Ok(_) => {
                        tracing::warn!("dialog backend returned empty reply, using template");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "dialog backend failed, using template");
                        None
                    }
                }
            }
            None => None,
        };
        let reply = generated.unwrap_or_else(|| template_reply(plan, results));
        DialogOutput::new(reply, success, data)
    }
}

#[async_trait]
impl Stage for Dialog {
    type Input = RenderInput;
    type Output = DialogOutput;

    fn name(&self) -> &'static str {
        "dialog"
    }

    async fn process(&self, input: RenderInput) -> Result<DialogOutput, PipelineError> {
        Ok(self.render(&input.plan, &input.results).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Intent;
    use crate::llm::MockLlmClient;

    fn query_plan() -> Plan {
        Plan::new(
            Intent::Query,
            vec![Step::operation(
                BusinessOperation::QueryShipment,
                json!({"order_number": "SF1234567890"}),
            )],
        )
    }

    #[tokio::test]
    async fn test_query_template_mentions_order() {
        let results = vec![ActorResult::Succeeded {
            output: json!({
                "order_number": "SF1234567890",
                "status": "运输中",
                "current_location": "北京转运中心",
                "estimated_delivery": null,
                "history": [{"time": "2024-01-10 10:00", "location": "深圳", "status": "已揽收"}]
            }),
        }];
        let out = Dialog::templated().render(&query_plan(), &results).await;
        assert!(out.envelope.success);
        assert!(out.reply.contains("SF1234567890"));
        assert!(out.reply.contains("深圳"));
        assert_eq!(out.envelope.message, out.reply);
        // null 字段被去除
        assert!(out.envelope.data["steps"]["0"].get("estimated_delivery").is_none());
        assert_eq!(out.envelope.data["intent"], "query");
    }

    #[tokio::test]
    async fn test_all_failed_still_has_message() {
        let results = vec![ActorResult::failed(ErrorKind::UnknownTool, "Unknown tool: geocode")];
        let plan = Plan::new(Intent::Query, vec![Step::tool("geocode", json!({}))]);
        let out = Dialog::templated().render(&plan, &results).await;
        assert!(!out.envelope.success);
        assert!(!out.reply.is_empty());
        assert!(out.envelope.data["steps"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_llm_reply_used_and_fallback_on_error() {
        let results = vec![ActorResult::Succeeded { output: json!({"order_number": "SF1234567890"}) }];
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::fixed("📦 SF1234567890 运输中"));
        let out = Dialog::new(Some(llm)).render(&query_plan(), &results).await;
        assert_eq!(out.reply, "📦 SF1234567890 运输中");

        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::failing("down"));
        let out = Dialog::new(Some(llm)).render(&query_plan(), &results).await;
        assert!(out.reply.starts_with("📦 订单号: SF1234567890"));
    }

    #[tokio::test]
    async fn test_clarification_template() {
        let mut plan = Plan::new(Intent::Modify, vec![]);
        plan.clarifications = vec!["订单号是多少？".into()];
        let out = Dialog::templated().render(&plan, &[]).await;
        assert!(out.reply.contains("❓ 订单号是多少？"));
    }

    #[test]
    fn test_synthesized_failure() {
        let out = synthesize_failure(ErrorKind::StorageUnavailable, "disk full");
        assert!(!out.envelope.success);
        assert!(!out.reply.is_empty());
        assert_eq!(out.envelope.data["error"], "StorageUnavailable");
    }
}
