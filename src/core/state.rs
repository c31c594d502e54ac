//! 单轮状态机
//!
//! `Idle → Perceiving → Reasoning → Acting → Responding → Idle`，严格顺序；
//! 阶段内出现基础设施错误时可从 Perceiving / Reasoning / Acting 直接进入 Responding。

use serde::Serialize;

/// 一轮处理所处阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TurnPhase {
    Idle,
    Perceiving,
    Reasoning,
    Acting,
    Responding,
}

impl TurnPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnPhase::Idle => "idle",
            TurnPhase::Perceiving => "perceiving",
            TurnPhase::Reasoning => "reasoning",
            TurnPhase::Acting => "acting",
            TurnPhase::Responding => "responding",
        }
    }

    /// 正常流程中的下一阶段
    pub fn next(self) -> TurnPhase {
        match self {
            TurnPhase::Idle => TurnPhase::Perceiving,
            TurnPhase::Perceiving => TurnPhase::Reasoning,
            TurnPhase::Reasoning => TurnPhase::Acting,
            TurnPhase::Acting => TurnPhase::Responding,
            TurnPhase::Responding => TurnPhase::Idle,
        }
    }

    pub fn can_transition(self, to: TurnPhase) -> bool {
        to == self.next()
            || (to == TurnPhase::Responding
                && matches!(
                    self,
                    TurnPhase::Perceiving | TurnPhase::Reasoning | TurnPhase::Acting
                ))
    }
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 记录一轮实际经过的阶段
#[derive(Debug, Clone)]
pub struct TurnMachine {
    phase: TurnPhase,
    trace: Vec<TurnPhase>,
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self {
            phase: TurnPhase::Idle,
            trace: vec![TurnPhase::Idle],
        }
    }
}

impl TurnMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// 推进到下一阶段；非法跳转返回 Err 且状态不变
    pub fn advance(&mut self, to: TurnPhase) -> Result<(), String> {
        if !self.phase.can_transition(to) {
            return Err(format!("illegal turn transition {} -> {}", self.phase, to));
        }
        tracing::debug!(from = %self.phase, to = %to, "turn phase");
        self.phase = to;
        self.trace.push(to);
        Ok(())
    }

    pub fn trace(&self) -> &[TurnPhase] {
        &self.trace
    }
}
