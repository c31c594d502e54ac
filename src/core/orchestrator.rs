//! 编排器：按固定顺序驱动四个阶段并读写会话存储
//!
//! 每轮：校验输入 → 获取会话锁 → 读取有界上下文 → 感知 → 推理 → 执行 → 对话 → 持久化 → 释放锁。
//! 感知 / 推理出现基础设施错误（或被取消）时直接进入 Responding，合成失败回复，
//! 仍持久化已产生的部分轮次；存储本身故障时只返回失败回复，不再尝试写入。
//! 调用方总是拿到结构完整的 envelope。

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::agents::{
    synthesize_failure, ActInput, Actor, ContentItem, Dialog, DialogOutput, Envelope,
    PerceiveInput, Perceiver, RawInput, ReasonInput, Reasoner, RenderInput, Stage,
};
use crate::core::session_supervisor::TurnGuard;
use crate::core::{ErrorKind, PipelineError, SessionSupervisor, TurnMachine, TurnPhase};
use crate::memory::{MemoryStore, NewTurn, PriorContext, StorageError, Turn};
use crate::tools::address_match_plan;

/// 一轮的完整结果（测试与 CLI 使用；HTTP 层只需要 envelope）
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub output: DialogOutput,
    /// 已持久化的轮次；未持久化时为 None
    pub turn: Option<Turn>,
    /// 实际经过的阶段
    pub phases: Vec<TurnPhase>,
}

impl TurnOutcome {
    fn rejected(kind: ErrorKind, detail: &str) -> Self {
        Self {
            output: synthesize_failure(kind, detail),
            turn: None,
            phases: vec![TurnPhase::Idle],
        }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.output.envelope
    }
}

/// 在取消令牌触发时放弃等待
async fn cancellable<T>(
    token: &CancellationToken,
    fut: impl Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(PipelineError::Cancelled),
        r = fut => r,
    }
}

async fn timed<S: Stage>(stage: &S, input: S::Input) -> Result<S::Output, PipelineError> {
    let start = Instant::now();
    let result = stage.process(input).await;
    tracing::info!(
        stage = stage.name(),
        ok = result.is_ok(),
        duration_ms = start.elapsed().as_millis() as u64,
        "stage finished"
    );
    result
}

/// 物流多智能体服务
pub struct LogisticsService {
    store: Arc<dyn MemoryStore>,
    perceiver: Perceiver,
    reasoner: Reasoner,
    actor: Actor,
    dialog: Dialog,
    /// 取消后或地址匹配时使用的模板渲染
    fallback_dialog: Dialog,
    supervisor: SessionSupervisor,
    context_window: usize,
}

impl LogisticsService {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        perceiver: Perceiver,
        reasoner: Reasoner,
        actor: Actor,
        dialog: Dialog,
        context_window: usize,
    ) -> Self {
        Self {
            store,
            perceiver,
            reasoner,
            actor,
            dialog,
            fallback_dialog: Dialog::templated(),
            supervisor: SessionSupervisor::new(),
            context_window,
        }
    }

    /// 处理一轮，返回 envelope `{success, message, data}`
    pub async fn handle_turn(&self, session_id: &str, input: RawInput) -> Envelope {
        self.run_turn(session_id, input, None).await.output.envelope
    }

    /// 路由层的内容条目形式（text / image_url / image）
    pub async fn handle_content(&self, session_id: &str, content: &[ContentItem]) -> Envelope {
        self.handle_turn(session_id, RawInput::from_content(content)).await
    }

    /// 带调用方取消令牌的处理
    pub async fn handle_turn_with_cancel(
        &self,
        session_id: &str,
        input: RawInput,
        cancel: CancellationToken,
    ) -> Envelope {
        self.run_turn(session_id, input, Some(cancel)).await.output.envelope
    }

    pub async fn run_turn(
        &self,
        session_id: &str,
        input: RawInput,
        cancel: Option<CancellationToken>,
    ) -> TurnOutcome {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            tracing::warn!("rejecting turn without session id");
            return TurnOutcome::rejected(ErrorKind::ValidationError, "session id is empty");
        }
        if input.is_empty() {
            tracing::warn!(session_id, "rejecting turn without content");
            return TurnOutcome::rejected(ErrorKind::ValidationError, "input has no content");
        }

        let guard = self.supervisor.begin_turn(session_id, cancel).await;
        let span = tracing::info_span!("turn", session_id = %session_id);
        self.run_locked(session_id, input, &guard).instrument(span).await
    }

    async fn load_context(&self, session_id: &str) -> Result<PriorContext, StorageError> {
        self.store.create_if_absent(session_id).await?;
        let turns = self
            .store
            .recent_context(session_id, self.context_window)
            .await?;
        Ok(PriorContext::new(turns))
    }

    fn step(machine: &mut TurnMachine, guard: &TurnGuard, to: TurnPhase) {
        if let Err(e) = machine.advance(to) {
            tracing::error!(error = %e, "turn state machine violated");
        }
        guard.set_phase(machine.phase());
    }

    async fn run_locked(&self, session_id: &str, input: RawInput, guard: &TurnGuard) -> TurnOutcome {
        let mut machine = TurnMachine::new();

        let context = match self.load_context(session_id).await {
            Ok(context) => context,
            Err(e) => {
                tracing::error!(error = %e, "cannot load session context");
                return TurnOutcome {
                    output: synthesize_failure(ErrorKind::StorageUnavailable, &e.to_string()),
                    turn: None,
                    phases: machine.trace().to_vec(),
                };
            }
        };

        let mut record = NewTurn::new(input.clone());
        let output = match self
            .run_stages(session_id, input, context, &mut record, &mut machine, guard)
            .await
        {
            Ok(dialog) => dialog,
            Err(e) => {
                let kind = e.kind();
                tracing::warn!(%kind, error = %e, "turn aborted");
                Self::step(&mut machine, guard, TurnPhase::Responding);
                record.failure = Some(kind);
                synthesize_failure(kind, &e.to_string())
            }
        };
        record.dialog = output.clone();

        let persisted = self.store.append(session_id, record).await;
        Self::step(&mut machine, guard, TurnPhase::Idle);
        let phases = machine.trace().to_vec();

        match persisted {
            Ok(turn) => {
                let mut output = output;
                let data = &mut output.envelope.data;
                data.insert("session_id".into(), json!(session_id));
                data.insert("seq".into(), json!(turn.seq));
                if let Some(perception) = &turn.perception {
                    data.insert(
                        "perception".into(),
                        serde_json::to_value(perception).unwrap_or(Value::Null),
                    );
                }
                tracing::info!(seq = turn.seq, success = output.envelope.success, "turn complete");
                TurnOutcome {
                    output,
                    turn: Some(turn),
                    phases,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "turn not persisted");
                let mut failed = synthesize_failure(ErrorKind::StorageUnavailable, &e.to_string());
                // 保留已生成的回复内容
                failed
                    .envelope
                    .data
                    .insert("reply".into(), json!(output.reply));
                TurnOutcome {
                    output: failed,
                    turn: None,
                    phases,
                }
            }
        }
    }

    async fn run_stages(
        &self,
        session_id: &str,
        input: RawInput,
        context: PriorContext,
        record: &mut NewTurn,
        machine: &mut TurnMachine,
        guard: &TurnGuard,
    ) -> Result<DialogOutput, PipelineError> {
        let token = guard.token().clone();

        Self::step(machine, guard, TurnPhase::Perceiving);
        let perception = cancellable(
            &token,
            timed(
                &self.perceiver,
                PerceiveInput {
                    raw: input.clone(),
                    context: context.clone(),
                },
            ),
        )
        .await?;
        record.perception = Some(perception.clone());

        Self::step(machine, guard, TurnPhase::Reasoning);
        let plan = cancellable(
            &token,
            timed(
                &self.reasoner,
                ReasonInput {
                    raw: input,
                    perception,
                    context,
                },
            ),
        )
        .await?;
        record.plan = Some(plan.clone());

        // 执行阶段自行处理取消，保留已完成步骤的结果
        Self::step(machine, guard, TurnPhase::Acting);
        let results = timed(
            &self.actor,
            ActInput {
                session_id: session_id.to_string(),
                plan: plan.clone(),
                cancel: token.clone(),
            },
        )
        .await?;
        record.results = Some(results.clone());

        Self::step(machine, guard, TurnPhase::Responding);
        let dialog = if token.is_cancelled() {
            tracing::info!("turn cancelled while acting");
            record.failure = Some(ErrorKind::Cancelled);
            &self.fallback_dialog
        } else {
            &self.dialog
        };
        timed(dialog, RenderInput { plan, results }).await
    }

    /// 取消该会话当前的轮次
    pub fn cancel(&self, session_id: &str) -> bool {
        self.supervisor.cancel(session_id)
    }

    /// 取消所有进行中的轮次（进程关闭时调用）
    pub fn shutdown(&self) {
        self.supervisor.shutdown();
    }

    pub fn phase(&self, session_id: &str) -> TurnPhase {
        self.supervisor.phase(session_id)
    }

    /// 会话完整历史
    pub async fn history(&self, session_id: &str) -> Result<Vec<Turn>, StorageError> {
        self.store.history(session_id).await
    }

    /// 地址匹配：单步工具计划，不写入会话
    pub async fn match_addresses(
        &self,
        source: Value,
        candidates: Value,
        distance_threshold_meters: Option<f64>,
    ) -> Envelope {
        let plan = address_match_plan(source, candidates, distance_threshold_meters);
        let results = self
            .actor
            .act("address-match", &plan, &CancellationToken::new())
            .await;
        self.fallback_dialog.render(&plan, &results).await.envelope
    }
}
