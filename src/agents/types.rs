//! 流水线数据模型：原始输入、感知结果、意图、计划、执行结果、对话输出

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::business::BusinessOperation;
use crate::core::ErrorKind;

/// 路由层传入的单个内容条目（text / image_url / image）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text { text: String },
    ImageUrl { image_url: String },
    /// base64 编码的图片
    Image { image: String },
}

/// 图片引用：内联图片只记录大小，不落库原始数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageRef {
    Url(String),
    Inline { bytes: usize },
}

/// 一轮的原始输入
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawInput {
    pub text: String,
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

impl RawInput {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }

    /// 文本条目以空格拼接，图片收集为引用
    pub fn from_content(items: &[ContentItem]) -> Self {
        let mut texts = Vec::new();
        let mut images = Vec::new();
        for item in items {
            match item {
                ContentItem::Text { text } => {
                    if !text.trim().is_empty() {
                        texts.push(text.trim().to_string());
                    }
                }
                ContentItem::ImageUrl { image_url } => images.push(ImageRef::Url(image_url.clone())),
                ContentItem::Image { image } => images.push(ImageRef::Inline { bytes: image.len() }),
            }
        }
        Self {
            text: texts.join(" "),
            images,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.images.is_empty()
    }

    /// 给 LLM 的文本形式：图片以占位标记出现
    pub fn prompt_text(&self) -> String {
        let mut parts = vec![self.text.clone()];
        for image in &self.images {
            match image {
                ImageRef::Url(url) => parts.push(format!("[image: {url}]")),
                ImageRef::Inline { .. } => parts.push("[image: base64]".to_string()),
            }
        }
        parts.retain(|p| !p.is_empty());
        parts.join(" ")
    }
}

/// 实体类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    TrackingNumber,
    Address,
    PartyName,
    Phone,
    Carrier,
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "tracking-number" | "order-number" => Ok(EntityKind::TrackingNumber),
            "address" => Ok(EntityKind::Address),
            "party-name" | "name" => Ok(EntityKind::PartyName),
            "phone" => Ok(EntityKind::Phone),
            "carrier" | "company" => Ok(EntityKind::Carrier),
            other => Err(format!("unknown entity type: {other}")),
        }
    }
}

/// 抽取出的实体：value 必须逐字出现在原始文本中
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl Entity {
    pub fn new(kind: EntityKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }
}

/// 感知阶段输出
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerceptionResult {
    pub entities: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_description: Option<String>,
}

impl PerceptionResult {
    pub fn contains_value(&self, value: &str) -> bool {
        self.entities.iter().any(|e| e.value == value)
    }
}

/// 意图：闭合枚举，解析其它值即失败
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Query,
    Modify,
    Insert,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Query => "query",
            Intent::Modify => "modify",
            Intent::Insert => "insert",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "query" => Ok(Intent::Query),
            "modify" => Ok(Intent::Modify),
            "insert" => Ok(Intent::Insert),
            other => Err(format!("intent must be one of query/modify/insert, got '{other}'")),
        }
    }
}

/// 计划步骤的动作：业务操作或已注册工具
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    Operation {
        op: BusinessOperation,
        #[serde(default)]
        arguments: Value,
    },
    Tool {
        tool: String,
        #[serde(default)]
        arguments: Value,
    },
}

/// 计划中的一步
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub action: StepAction,
    /// 显式依赖的前序步骤下标
    #[serde(default)]
    pub depends_on: Vec<usize>,
    /// 本步引用的实体值
    #[serde(default)]
    pub entities: Vec<String>,
}

impl Step {
    pub fn operation(op: BusinessOperation, arguments: Value) -> Self {
        Self {
            action: StepAction::Operation { op, arguments },
            depends_on: Vec::new(),
            entities: Vec::new(),
        }
    }

    pub fn tool(tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            action: StepAction::Tool {
                tool: tool.into(),
                arguments,
            },
            depends_on: Vec::new(),
            entities: Vec::new(),
        }
    }

    pub fn after(mut self, index: usize) -> Self {
        self.depends_on.push(index);
        self
    }

    pub fn referencing(mut self, value: impl Into<String>) -> Self {
        self.entities.push(value.into());
        self
    }

    pub fn arguments(&self) -> &Value {
        match &self.action {
            StepAction::Operation { arguments, .. } | StepAction::Tool { arguments, .. } => arguments,
        }
    }

    /// 日志与回复里使用的名称
    pub fn label(&self) -> String {
        match &self.action {
            StepAction::Operation { op, .. } => op.as_str().to_string(),
            StepAction::Tool { tool, .. } => format!("tool:{tool}"),
        }
    }

    /// 全部依赖：显式 depends_on 与参数中 `$ref` 指向的步骤
    pub fn dependencies(&self) -> BTreeSet<usize> {
        let mut deps: BTreeSet<usize> = self.depends_on.iter().copied().collect();
        collect_refs(self.arguments(), &mut deps);
        deps
    }
}

/// 参数中的前序输出引用：`{"$ref": "steps.<i>.<path>"}`
pub const REF_KEY: &str = "$ref";

/// 解析 `steps.<i>.<a>.<b>` 为 (i, [a, b])
pub fn parse_ref(reference: &str) -> Option<(usize, Vec<&str>)> {
    let mut parts = reference.split('.');
    if parts.next()? != "steps" {
        return None;
    }
    let index = parts.next()?.parse().ok()?;
    Some((index, parts.filter(|p| !p.is_empty()).collect()))
}

/// 若 value 形如 `{"$ref": "..."}` 则返回引用字符串
pub fn as_ref_placeholder(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) if map.len() == 1 => map.get(REF_KEY).and_then(Value::as_str),
        _ => None,
    }
}

fn collect_refs(value: &Value, out: &mut BTreeSet<usize>) {
    if let Some(reference) = as_ref_placeholder(value) {
        if let Some((index, _)) = parse_ref(reference) {
            out.insert(index);
        }
        return;
    }
    match value {
        Value::Object(map) => map.values().for_each(|v| collect_refs(v, out)),
        Value::Array(items) => items.iter().for_each(|v| collect_refs(v, out)),
        _ => {}
    }
}

/// 推理阶段输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub intent: Intent,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub reasoning: String,
    /// 信息不足时向用户追问的问题
    #[serde(default)]
    pub clarifications: Vec<String>,
}

impl Plan {
    pub fn new(intent: Intent, steps: Vec<Step>) -> Self {
        Self {
            intent,
            steps,
            reasoning: String::new(),
            clarifications: Vec::new(),
        }
    }

    /// 检查依赖只指向严格靠前的步骤
    pub fn check_ordering(&self) -> Result<(), String> {
        for (index, step) in self.steps.iter().enumerate() {
            if let Some(bad) = step.dependencies().into_iter().find(|d| *d >= index) {
                return Err(format!(
                    "step {index} ({}) depends on step {bad}, which is not strictly earlier",
                    step.label()
                ));
            }
        }
        Ok(())
    }
}

/// 单步执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActorResult {
    Succeeded { output: Value },
    Failed { kind: ErrorKind, message: String },
}

impl ActorResult {
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        ActorResult::Failed {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ActorResult::Succeeded { .. })
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match self {
            ActorResult::Failed { kind, .. } => Some(*kind),
            ActorResult::Succeeded { .. } => None,
        }
    }

    pub fn output(&self) -> Option<&Value> {
        match self {
            ActorResult::Succeeded { output } => Some(output),
            ActorResult::Failed { .. } => None,
        }
    }
}

/// 路由层使用的响应 envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    pub data: Map<String, Value>,
}

/// 对话阶段输出：回复文本 + envelope（message 与 reply 一致）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogOutput {
    pub reply: String,
    pub envelope: Envelope,
}

impl DialogOutput {
    pub fn new(reply: impl Into<String>, success: bool, data: Map<String, Value>) -> Self {
        let reply = reply.into();
        Self {
            envelope: Envelope {
                success,
                message: reply.clone(),
                data,
            },
            reply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intent_is_closed() {
        assert_eq!("query".parse::<Intent>().unwrap(), Intent::Query);
        assert_eq!(" Modify ".parse::<Intent>().unwrap(), Intent::Modify);
        assert!("clarify".parse::<Intent>().is_err());
        assert!("delete".parse::<Intent>().is_err());
        assert!(serde_json::from_str::<Intent>("\"unknown\"").is_err());
    }

    #[test]
    fn test_raw_input_from_content() {
        let input = RawInput::from_content(&[
            ContentItem::Text { text: "查一下".into() },
            ContentItem::ImageUrl { image_url: "http://img/1.png".into() },
            ContentItem::Text { text: "SF1234567890".into() },
            ContentItem::Image { image: "aGVsbG8=".into() },
        ]);
        assert_eq!(input.text, "查一下 SF1234567890");
        assert_eq!(input.images.len(), 2);
        assert_eq!(
            input.prompt_text(),
            "查一下 SF1234567890 [image: http://img/1.png] [image: base64]"
        );
    }

    #[test]
    fn test_content_item_wire_format() {
        let item: ContentItem =
            serde_json::from_value(json!({"type": "image_url", "image_url": "http://x"})).unwrap();
        assert_eq!(item, ContentItem::ImageUrl { image_url: "http://x".into() });
    }

    #[test]
    fn test_step_dependencies_include_refs() {
        let step = Step::operation(
            BusinessOperation::ModifyStatus,
            json!({
                "order_id": {"$ref": "steps.0.data.order_id"},
                "nested": [{"$ref": "steps.2"}]
            }),
        )
        .after(1);
        let deps: Vec<usize> = step.dependencies().into_iter().collect();
        assert_eq!(deps, vec![0, 1, 2]);
    }

    #[test]
    fn test_plan_rejects_forward_reference() {
        let plan = Plan::new(
            Intent::Modify,
            vec![
                Step::operation(
                    BusinessOperation::ModifyStatus,
                    json!({"order_id": {"$ref": "steps.1.order_id"}}),
                ),
                Step::operation(BusinessOperation::QueryShipment, json!({"order_number": "SF1"})),
            ],
        );
        assert!(plan.check_ordering().is_err());

        let ok = Plan::new(
            Intent::Query,
            vec![
                Step::operation(BusinessOperation::QueryShipment, json!({})),
                Step::tool("address_match", json!({})).after(0),
            ],
        );
        assert!(ok.check_ordering().is_ok());
    }

    #[test]
    fn test_parse_ref() {
        assert_eq!(parse_ref("steps.3.data.id"), Some((3, vec!["data", "id"])));
        assert_eq!(parse_ref("steps.0"), Some((0, vec![])));
        assert_eq!(parse_ref("outputs.0"), None);
        assert_eq!(parse_ref("steps.x"), None);
    }

    #[test]
    fn test_actor_result_wire_format() {
        let failed = ActorResult::failed(ErrorKind::UnknownTool, "no such tool");
        let v = serde_json::to_value(&failed).unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["kind"], "UnknownTool");
        assert!(!failed.is_success());
        assert_eq!(failed.failure_kind(), Some(ErrorKind::UnknownTool));
    }
}
