//! 内置地址匹配工具
//!
//! 对源地址与候选地址逐一打分：文本采用字符二元组 Dice 系数，双方都带经纬度时再结合球面距离。
//! 结果按分数降序给出匹配列表，并给出全局建议（`similar_address` / `new_address`）。
//! 同一输入总是得到同一输出。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agents::{Intent, Plan, Step};
use crate::tools::{ToolError, ToolHandle, ToolRequest, ToolResponse, ToolSchema};

pub const ADDRESS_MATCH_TOOL: &str = "address_match";

const DEFAULT_THRESHOLD_METERS: f64 = 100.0;
const SAME_LOCATION_SCORE: f64 = 0.8;
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// 地址：纯文本或带坐标的结构
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum AddressInput {
    Text(String),
    Detailed(AddressPoint),
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct AddressPoint {
    #[serde(default)]
    pub candidate_id: Option<String>,
    #[serde(default, alias = "address")]
    pub address_text: Option<String>,
    /// 完整结构化地址
    #[serde(default, alias = "actualAddress")]
    pub actual_address: Option<String>,
    /// 一级地址（如建筑物名称）
    #[serde(default, alias = "firstLevelAddress")]
    pub first_level_address: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl AddressInput {
    fn point(&self) -> AddressPoint {
        match self {
            AddressInput::Text(text) => AddressPoint {
                address_text: Some(text.clone()),
                ..AddressPoint::default()
            },
            AddressInput::Detailed(point) => point.clone(),
        }
    }
}

impl AddressPoint {
    fn texts(&self) -> Vec<&str> {
        [&self.address_text, &self.actual_address, &self.first_level_address]
            .into_iter()
            .filter_map(|t| t.as_deref())
            .filter(|t| !t.trim().is_empty())
            .collect()
    }

    fn display(&self) -> String {
        self.texts().first().map(|t| t.to_string()).unwrap_or_default()
    }

    fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

/// 工具参数
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AddressMatchArgs {
    pub source: AddressInput,
    pub candidates: Vec<AddressInput>,
    #[serde(default)]
    pub distance_threshold_meters: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct AddressMatch {
    pub index: usize,
    pub candidate_id: String,
    pub address_text: String,
    pub is_same_location: bool,
    pub confidence_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_meters: Option<f64>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct Recommendation {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_candidate_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_address_text: Option<String>,
    pub overall_confidence: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct BestMatch {
    pub index: usize,
    pub address: String,
    pub score: f64,
    pub is_same_location: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct AddressMatchOutcome {
    pub best: Option<BestMatch>,
    pub matches: Vec<AddressMatch>,
    pub recommendation: Recommendation,
}

fn normalize(text: &str) -> Vec<char> {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn bigrams(chars: &[char]) -> Vec<(char, char)> {
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// 字符二元组 Dice 系数，取值 0..=1
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (normalize(a), normalize(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    if a.len() < 2 || b.len() < 2 {
        return 0.0;
    }
    let left = bigrams(&a);
    let mut right = bigrams(&b);
    let total = left.len() + right.len();
    let mut shared = 0usize;
    for pair in left {
        if let Some(pos) = right.iter().position(|p| *p == pair) {
            right.swap_remove(pos);
            shared += 1;
        }
    }
    (2 * shared) as f64 / total as f64
}

/// 球面距离（米）
pub fn haversine_meters(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn score_candidate(
    source: &AddressPoint,
    index: usize,
    candidate: &AddressPoint,
    threshold: f64,
) -> AddressMatch {
    let text = source
        .texts()
        .iter()
        .flat_map(|s| candidate.texts().into_iter().map(move |c| text_similarity(s, c)))
        .fold(0.0_f64, f64::max);
    let distance = source
        .coordinates()
        .zip(candidate.coordinates())
        .map(|(a, b)| haversine_meters(a, b));

    let (score, same, reason) = match distance {
        Some(d) => {
            let geo = if d <= threshold { 1.0 } else { (threshold / d).min(1.0) };
            let score = 0.6 * geo + 0.4 * text;
            let same = (d <= threshold && text >= 0.3) || score >= SAME_LOCATION_SCORE;
            let reason = format!(
                "距离 {:.0} 米（阈值 {:.0} 米），文本相似度 {:.2}",
                d, threshold, text
            );
            (score, same, reason)
        }
        None => (
            text,
            text >= SAME_LOCATION_SCORE,
            format!("文本相似度 {:.2}（无坐标）", text),
        ),
    };

    AddressMatch {
        index,
        candidate_id: candidate
            .candidate_id
            .clone()
            .unwrap_or_else(|| index.to_string()),
        address_text: candidate.display(),
        is_same_location: same,
        confidence_score: round3(score),
        distance_meters: distance.map(|d| (d * 10.0).round() / 10.0),
        reason,
    }
}

/// 计算匹配结果
pub fn match_addresses(args: &AddressMatchArgs) -> AddressMatchOutcome {
    let threshold = args
        .distance_threshold_meters
        .filter(|t| t.is_finite() && *t > 0.0)
        .unwrap_or(DEFAULT_THRESHOLD_METERS);
    let source = args.source.point();

    let mut matches: Vec<AddressMatch> = args
        .candidates
        .iter()
        .enumerate()
        .map(|(i, c)| score_candidate(&source, i, &c.point(), threshold))
        .collect();
    // 分数相同按原顺序
    matches.sort_by(|a, b| {
        b.confidence_score
            .total_cmp(&a.confidence_score)
            .then(a.index.cmp(&b.index))
    });

    let best = matches.first().map(|m| BestMatch {
        index: m.index,
        address: m.address_text.clone(),
        score: m.confidence_score,
        is_same_location: m.is_same_location,
    });

    let recommendation = match matches.first() {
        Some(top) if top.is_same_location => Recommendation {
            action: "similar_address".into(),
            suggested_candidate_id: Some(top.candidate_id.clone()),
            suggested_address_text: Some(top.address_text.clone()),
            overall_confidence: top.confidence_score,
            reason: format!("候选 {} 与源地址为同一位置：{}", top.index, top.reason),
        },
        Some(top) => Recommendation {
            action: "new_address".into(),
            suggested_candidate_id: None,
            suggested_address_text: None,
            overall_confidence: round3(1.0 - top.confidence_score),
            reason: format!("最相近的候选 {} 仍不足以判定为同一位置", top.index),
        },
        None => Recommendation {
            action: "new_address".into(),
            suggested_candidate_id: None,
            suggested_address_text: None,
            overall_confidence: 1.0,
            reason: "没有候选地址".into(),
        },
    };

    AddressMatchOutcome {
        best,
        matches,
        recommendation,
    }
}

/// 地址匹配工具句柄
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressMatchTool;

impl AddressMatchTool {
    pub fn schema() -> ToolSchema {
        ToolSchema::for_input::<AddressMatchArgs>(
            "判断源地址与候选地址是否为同一位置，返回最佳候选与建议",
        )
        .with_output::<AddressMatchOutcome>()
    }
}

#[async_trait]
impl ToolHandle for AddressMatchTool {
    async fn call(&self, request: ToolRequest) -> Result<ToolResponse, ToolError> {
        let args: AddressMatchArgs = match serde_json::from_value(request.arguments) {
            Ok(args) => args,
            Err(e) => return Ok(ToolResponse::err("InvalidToolArguments", e.to_string())),
        };
        match serde_json::to_value(match_addresses(&args)) {
            Ok(result) => Ok(ToolResponse::ok(result)),
            Err(e) => Ok(ToolResponse::err("ToolInvocationError", e.to_string())),
        }
    }
}

/// 地址匹配的单步计划
pub fn address_match_plan(source: Value, candidates: Value, threshold: Option<f64>) -> Plan {
    let mut arguments = json!({"source": source, "candidates": candidates});
    if let Some(t) = threshold {
        arguments["distance_threshold_meters"] = json!(t);
    }
    let mut plan = Plan::new(Intent::Query, vec![Step::tool(ADDRESS_MATCH_TOOL, arguments)]);
    plan.reasoning = "address match".into();
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;

    #[test]
    fn test_text_similarity() {
        assert_eq!(text_similarity("北京市朝阳区建国路88号", "北京市 朝阳区 建国路 88号"), 1.0);
        assert!(text_similarity("北京市朝阳区建国路88号", "北京朝阳建国路88号") > 0.6);
        assert!(text_similarity("北京市朝阳区", "上海市浦东新区") < 0.3);
        assert_eq!(text_similarity("", "北京"), 0.0);
    }

    #[test]
    fn test_haversine() {
        let d = haversine_meters((39.9087, 116.3975), (39.9087, 116.3975));
        assert!(d.abs() < 1e-6);
        // 约 0.001 度纬度 ≈ 111 米
        let d = haversine_meters((39.9087, 116.3975), (39.9097, 116.3975));
        assert!((d - 111.2).abs() < 1.0, "{d}");
    }

    #[test]
    fn test_coordinates_upgrade_match() {
        let args: AddressMatchArgs = serde_json::from_value(json!({
            "source": {"address_text": "国贸大厦", "latitude": 39.9087, "longitude": 116.4605},
            "candidates": [
                {"candidate_id": "poi-1", "address_text": "上海中心", "latitude": 31.2335, "longitude": 121.5055},
                {"candidate_id": "poi-2", "address_text": "国贸大厦A座", "latitude": 39.9088, "longitude": 116.4606}
            ]
        }))
        .unwrap();
        let outcome = match_addresses(&args);
        let best = outcome.best.unwrap();
        assert_eq!(best.index, 1);
        assert!(best.is_same_location);
        assert_eq!(outcome.recommendation.action, "similar_address");
        assert_eq!(outcome.recommendation.suggested_candidate_id.as_deref(), Some("poi-2"));
    }

    #[test]
    fn test_no_candidates_is_new_address() {
        let args: AddressMatchArgs =
            serde_json::from_value(json!({"source": "北京市朝阳区", "candidates": []})).unwrap();
        let outcome = match_addresses(&args);
        assert!(outcome.best.is_none());
        assert_eq!(outcome.recommendation.action, "new_address");
    }

    #[tokio::test]
    async fn test_registered_tool_is_idempotent() {
        let registry = ToolRegistry::new();
        registry.register(ADDRESS_MATCH_TOOL, AddressMatchTool::schema(), AddressMatchTool);
        let args = json!({
            "source": "北京市朝阳区建国路88号",
            "candidates": ["北京朝阳建国路88号", "北京市海淀区中关村大街1号"]
        });
        let first = registry.invoke(ADDRESS_MATCH_TOOL, args.clone()).await.unwrap();
        let second = registry.invoke(ADDRESS_MATCH_TOOL, args).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first["best"]["index"], 0);
    }

    #[tokio::test]
    async fn test_schema_rejects_missing_candidates() {
        let registry = ToolRegistry::new();
        registry.register(ADDRESS_MATCH_TOOL, AddressMatchTool::schema(), AddressMatchTool);
        let err = registry
            .invoke(ADDRESS_MATCH_TOOL, json!({"source": "北京"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[test]
    fn test_plan_shape() {
        let plan = address_match_plan(json!("A"), json!(["B"]), Some(50.0));
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].arguments()["distance_threshold_meters"], 50.0);
        assert!(plan.check_ordering().is_ok());
    }
}
