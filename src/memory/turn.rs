//! 会话与轮次记录
//!
//! Turn 一经追加不可修改；更正以新 Turn 的形式出现。`PriorContext` 是注入感知/推理阶段的
//! 有界历史窗口（按时间正序）。

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::{ActorResult, DialogOutput, PerceptionResult, Plan, RawInput};
use crate::core::ErrorKind;
use crate::memory::Message;

/// 会话元数据（轮次本身通过 MemoryStore 按需读取）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 待追加的轮次：序号由存储在追加时分配
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTurn {
    pub input: RawInput,
    #[serde(default)]
    pub perception: Option<PerceptionResult>,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub results: Option<Vec<ActorResult>>,
    pub dialog: DialogOutput,
    /// 轮次被基础设施错误中止时的错误种类
    #[serde(default)]
    pub failure: Option<ErrorKind>,
}

impl NewTurn {
    pub fn new(input: RawInput) -> Self {
        Self {
            input,
            perception: None,
            plan: None,
            results: None,
            dialog: DialogOutput::default(),
            failure: None,
        }
    }
}

/// 已持久化的轮次
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    pub input: RawInput,
    pub perception: Option<PerceptionResult>,
    pub plan: Option<Plan>,
    pub results: Option<Vec<ActorResult>>,
    pub dialog: DialogOutput,
    pub failure: Option<ErrorKind>,
}

impl Turn {
    pub fn from_new(seq: u64, created_at: DateTime<Utc>, turn: NewTurn) -> Self {
        Self {
            seq,
            created_at,
            input: turn.input,
            perception: turn.perception,
            plan: turn.plan,
            results: turn.results,
            dialog: turn.dialog,
            failure: turn.failure,
        }
    }
}

/// 注入各阶段的历史上下文（时间正序，长度受 context_window 约束）
#[derive(Debug, Clone, Default)]
pub struct PriorContext {
    pub turns: Vec<Turn>,
}

impl PriorContext {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// 历史轮次中感知到的全部实体值（推理阶段允许引用）
    pub fn entity_values(&self) -> HashSet<String> {
        self.turns
            .iter()
            .filter_map(|t| t.perception.as_ref())
            .flat_map(|p| p.entities.iter().map(|e| e.value.clone()))
            .collect()
    }

    /// 推理阶段允许引用的值：实体值，加上历史成功输出中的订单标识
    pub fn known_values(&self) -> HashSet<String> {
        let mut values = self.entity_values();
        let outputs = self
            .turns
            .iter()
            .filter_map(|t| t.results.as_ref())
            .flatten()
            .filter_map(ActorResult::output);
        for output in outputs {
            for key in ["order_id", "order_number"] {
                match output.get(key) {
                    Some(serde_json::Value::String(s)) if !s.is_empty() => {
                        values.insert(s.clone());
                    }
                    Some(serde_json::Value::Number(n)) => {
                        values.insert(n.to_string());
                    }
                    _ => {}
                }
            }
        }
        values
    }

    /// 转成 user/assistant 交替的转录，拼接进 LLM 请求
    pub fn messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.turns.len() * 2);
        for turn in &self.turns {
            out.push(Message::user(turn.input.prompt_text()));
            if !turn.dialog.reply.is_empty() {
                out.push(Message::assistant(turn.dialog.reply.clone()));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Entity, EntityKind};

    fn turn(seq: u64, text: &str, entity: Option<&str>, reply: &str) -> Turn {
        let mut new = NewTurn::new(RawInput::from_text(text));
        new.perception = entity.map(|v| PerceptionResult {
            entities: vec![Entity::new(EntityKind::TrackingNumber, v)],
            image_description: None,
        });
        new.dialog = DialogOutput::new(reply, true, Default::default());
        Turn::from_new(seq, Utc::now(), new)
    }

    #[test]
    fn test_known_values_include_result_identifiers() {
        let mut first = NewTurn::new(RawInput::from_text("查 SF1234567890"));
        first.results = Some(vec![
            ActorResult::Succeeded {
                output: serde_json::json!({"order_id": "1001", "order_number": "SF1234567890"}),
            },
            ActorResult::failed(ErrorKind::UnknownTool, "geocode"),
        ]);
        let ctx = PriorContext::new(vec![Turn::from_new(1, Utc::now(), first)]);
        let values = ctx.known_values();
        assert!(values.contains("1001"));
        assert!(values.contains("SF1234567890"));
        assert!(ctx.entity_values().is_empty());
    }

    #[test]
    fn test_context_entity_values() {
        let ctx = PriorContext::new(vec![
            turn(1, "查 SF1234567890", Some("SF1234567890"), "在途中"),
            turn(2, "谢谢", None, "不客气"),
        ]);
        let values = ctx.entity_values();
        assert_eq!(values.len(), 1);
        assert!(values.contains("SF1234567890"));
    }

    #[test]
    fn test_context_messages_alternate() {
        let ctx = PriorContext::new(vec![turn(1, "hello", None, "hi")]);
        let msgs = ctx.messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, "hello");
        assert_eq!(msgs[1].content, "hi");
    }

    #[test]
    fn test_turn_roundtrips_through_json() {
        let t = turn(7, "查 SF1234567890", Some("SF1234567890"), "在途中");
        let json = serde_json::to_string(&t).unwrap();
        let back: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(back.seq, 7);
        assert_eq!(back.dialog.reply, "在途中");
    }
}
