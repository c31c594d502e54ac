//! 感知智能体：从原始输入中抽取结构化实体
//!
//! 一次 LLM 调用（要求输出 JSON 实体列表）与规则抽取结果合并：
//! - 订单号：`order` + 8~20 位字母数字、`ORD-YYYY-NNN`、承运商前缀 + 数字（如 `SF1234567890`）、10~25 位纯数字
//! - 手机号：中国大陆 11 位手机号
//! - 承运商：常见快递公司名称
//!
//! 只保留去空白后非空、且在输入文本中逐字出现的实体；按值去重。
//! LLM 不可用返回 `PerceptionBackend`；回复无法解析时降级为规则结果。

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::agents::json::parse_json;
use crate::agents::{Entity, EntityKind, PerceptionResult, RawInput, Stage};
use crate::core::PipelineError;
use crate::llm::LlmClient;
use crate::memory::{Message, PriorContext};

/// 系统提示首行标记
pub const PERCEIVER_ROLE: &str = "[logistics-perceiver]";

const SYSTEM_PROMPT: &str = r#"[logistics-perceiver]
你是物流信息感知智能体。从用户输入中识别以下实体：
- tracking-number：运单号 / 订单号（如 SF1234567890、ORD-2024-001）
- address：地址
- party-name：收件人 / 寄件人 / 公司名称
- phone：电话号码
- carrier：承运商（如 顺丰、京东）

要求：
1. value 必须与用户原文完全一致，不要改写、补全或翻译
2. 没有识别到实体时返回空列表
3. 输入包含图片时，在 image_description 中简要描述图片内容

只输出 JSON：
{"entities": [{"type": "tracking-number", "value": "SF1234567890", "confidence": 0.95}], "image_description": null}"#;

const CARRIERS: [&str; 13] = [
    "顺丰", "京东", "圆通", "中通", "申通", "韵达", "邮政", "EMS", "德邦", "极兔", "DHL", "FedEx",
    "UPS",
];

static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
static PHONE_RE: OnceLock<Regex> = OnceLock::new();
static ORDER_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn token_re() -> &'static Regex {
    TOKEN_RE.get_or_init(|| Regex::new(r"[A-Za-z0-9_-]+").unwrap())
}

fn phone_re() -> &'static Regex {
    PHONE_RE.get_or_init(|| Regex::new(r"^1[3-9]\d{9}$").unwrap())
}

fn order_patterns() -> &'static [Regex] {
    ORDER_PATTERNS.get_or_init(|| {
        [
            r"(?i)^order[a-z0-9]{8,20}$",
            r"(?i)^ORD[-_]?\d{4}[-_]?\d{3,}$",
            r"^[A-Z]{2,4}\d{9,20}$",
            r"^\d{10,25}$",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

/// 整个值形如单号或手机号
pub fn looks_like_identifier(value: &str) -> bool {
    phone_re().is_match(value) || order_patterns().iter().any(|re| re.is_match(value))
}

/// 规则抽取（确定性）
pub fn extract_rule_entities(text: &str) -> Vec<Entity> {
    let mut entities = Vec::new();
    for token in token_re().find_iter(text) {
        let value = token.as_str().trim_matches(|c: char| c == '-' || c == '_');
        if value.is_empty() {
            continue;
        }
        if phone_re().is_match(value) {
            entities.push(Entity::new(EntityKind::Phone, value).with_confidence(0.9));
        } else if order_patterns().iter().any(|re| re.is_match(value)) {
            entities.push(Entity::new(EntityKind::TrackingNumber, value).with_confidence(0.9));
        }
    }
    for carrier in CARRIERS {
        if text.contains(carrier) {
            entities.push(Entity::new(EntityKind::Carrier, carrier).with_confidence(0.8));
        }
    }
    entities
}

#[derive(Debug, Deserialize)]
struct LlmEntity {
    #[serde(rename = "type", alias = "kind")]
    kind: String,
    value: String,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPerception {
    #[serde(default)]
    entities: Vec<LlmEntity>,
    #[serde(default)]
    image_description: Option<String>,
}

/// 合并并过滤：非空、逐字出现、按值去重（先到者优先）
fn admit(text: &str, candidates: impl IntoIterator<Item = Entity>) -> Vec<Entity> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for mut entity in candidates {
        let value = entity.value.trim();
        if value.is_empty() || !text.contains(value) {
            tracing::debug!(value = %entity.value, "dropping entity not present in input");
            continue;
        }
        if !seen.insert(value.to_string()) {
            continue;
        }
        entity.value = value.to_string();
        out.push(entity);
    }
    out
}

pub struct PerceiveInput {
    pub raw: RawInput,
    pub context: PriorContext,
}

pub struct Perceiver {
    llm: Arc<dyn LlmClient>,
}

impl Perceiver {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn perceive(
        &self,
        raw: &RawInput,
        context: &PriorContext,
    ) -> Result<PerceptionResult, PipelineError> {
        let mut messages = vec![Message::system(SYSTEM_PROMPT)];
        messages.extend(context.messages());
        messages.push(Message::user(raw.prompt_text()));

        let reply = self
            .llm
            .complete(&messages)
            .await
            .map_err(PipelineError::PerceptionBackend)?;

        let parsed = match parse_json::<LlmPerception>(&reply) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "perceiver reply not parseable, using rule-based entities");
                LlmPerception::default()
            }
        };

        let from_llm = parsed.entities.into_iter().filter_map(|e| {
            match EntityKind::from_str(&e.kind) {
                Ok(kind) => {
                    let entity = Entity::new(kind, e.value);
                    Some(match e.confidence {
                        Some(c) => entity.with_confidence(c),
                        None => entity,
                    })
                }
                Err(_) => {
                    tracing::debug!(kind = %e.kind, "ignoring entity of unknown kind");
                    None
                }
            }
        });
        let entities = admit(&raw.text, from_llm.chain(extract_rule_entities(&raw.text)));

        Ok(PerceptionResult {
            entities,
            image_description: parsed
                .image_description
                .filter(|d| !d.trim().is_empty() && !raw.images.is_empty()),
        })
    }
}

#[async_trait]
impl Stage for Perceiver {
    type Input = PerceiveInput;
    type Output = PerceptionResult;

    fn name(&self) -> &'static str {
        "perceiver"
    }

    async fn process(&self, input: PerceiveInput) -> Result<PerceptionResult, PipelineError> {
        self.perceive(&input.raw, &input.context).await
    }
}
