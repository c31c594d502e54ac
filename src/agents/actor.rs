//! 执行智能体：按序执行计划步骤
//!
//! 每步产出一个 ActorResult（数量与顺序同计划）。依赖的前序步骤失败时本步不执行，
//! 记为 `SkippedDueToDependency`。工具步骤经 ToolExecutor（超时 + 审计）进入注册表；
//! 业务步骤经 [`business::execute`]。所有失败都记录在结果里，不会中止流水线。
//! 取消后，未完成的步骤记为 `Cancelled`。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::agents::{as_ref_placeholder, parse_ref, ActorResult, Plan, Stage, Step, StepAction};
use crate::business::{self, BusinessOperations, OperationContext};
use crate::core::{ErrorKind, PipelineError};
use crate::tools::ToolExecutor;

/// 把参数中的 `{"$ref": "steps.<i>.<path>"}` 替换为前序输出中的值
pub fn resolve_refs(value: &Value, results: &[ActorResult]) -> Result<Value, String> {
    if let Some(reference) = as_ref_placeholder(value) {
        let (index, path) =
            parse_ref(reference).ok_or_else(|| format!("malformed reference '{reference}'"))?;
        let output = results
            .get(index)
            .and_then(ActorResult::output)
            .ok_or_else(|| format!("reference '{reference}' points at a step without output"))?;
        let mut current = output;
        for segment in &path {
            current = match current {
                Value::Object(map) => map.get(*segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            }
            .ok_or_else(|| format!("reference '{reference}' not found in step {index} output"))?;
        }
        return Ok(current.clone());
    }
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolve_refs(v, results)?)))
            .collect::<Result<serde_json::Map<_, _>, String>>()
            .map(Value::Object),
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_refs(v, results))
            .collect::<Result<Vec<_>, String>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

pub struct ActInput {
    pub session_id: String,
    pub plan: Plan,
    pub cancel: CancellationToken,
}

pub struct Actor {
    executor: Arc<ToolExecutor>,
    business: Arc<dyn BusinessOperations>,
}

impl Actor {
    pub fn new(executor: Arc<ToolExecutor>, business: Arc<dyn BusinessOperations>) -> Self {
        Self { executor, business }
    }

    pub async fn act(
        &self,
        session_id: &str,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Vec<ActorResult> {
        let ctx = OperationContext {
            session_id: session_id.to_string(),
        };
        let mut results: Vec<ActorResult> = Vec::with_capacity(plan.steps.len());

        for (index, step) in plan.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                results.push(ActorResult::failed(
                    ErrorKind::Cancelled,
                    format!("step {index} not run: turn cancelled"),
                ));
                continue;
            }

            let blocked = step
                .dependencies()
                .into_iter()
                .find(|d| !results.get(*d).is_some_and(ActorResult::is_success));
            if let Some(dep) = blocked {
                tracing::info!(step = index, depends_on = dep, "step skipped: dependency failed");
                results.push(ActorResult::failed(
                    ErrorKind::SkippedDueToDependency,
                    format!("step {index} ({}) skipped: step {dep} did not succeed", step.label()),
                ));
                continue;
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => ActorResult::failed(
                    ErrorKind::Cancelled,
                    format!("step {index} cancelled while running"),
                ),
                r = self.run_step(&ctx, step, &results) => r,
            };
            match &result {
                ActorResult::Succeeded { .. } => {
                    tracing::info!(step = index, action = %step.label(), "step succeeded")
                }
                ActorResult::Failed { kind, message } => {
                    tracing::warn!(step = index, action = %step.label(), %kind, %message, "step failed")
                }
            }
            results.push(result);
        }
        results
    }

    async fn run_step(
        &self,
        ctx: &OperationContext,
        step: &Step,
        earlier: &[ActorResult],
    ) -> ActorResult {
        match &step.action {
            StepAction::Tool { tool, arguments } => {
                let args = match resolve_refs(arguments, earlier) {
                    Ok(args) => args,
                    Err(e) => return ActorResult::failed(ErrorKind::InvalidToolArguments, e),
                };
                match self.executor.execute(tool, args).await {
                    Ok(output) => ActorResult::Succeeded { output },
                    Err(e) => ActorResult::failed(e.kind(), e.to_string()),
                }
            }
            StepAction::Operation { op, arguments } => {
                let args = match resolve_refs(arguments, earlier) {
                    Ok(args) => args,
                    Err(e) => return ActorResult::failed(ErrorKind::ActorOperationError, e),
                };
                match business::execute(self.business.as_ref(), ctx, *op, &args).await {
                    Ok(output) => ActorResult::Succeeded { output },
                    Err(e) => ActorResult::failed(e.kind(), e.to_string()),
                }
            }
        }
    }
}

#[async_trait]
impl Stage for Actor {
    type Input = ActInput;
    type Output = Vec<ActorResult>;

    fn name(&self) -> &'static str {
        "actor"
    }

    async fn process(&self, input: ActInput) -> Result<Vec<ActorResult>, PipelineError> {
        Ok(self.act(&input.session_id, &input.plan, &input.cancel).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Intent;
    use crate::business::{BusinessOperation, InMemoryShipments};
    use crate::tools::{AddressMatchTool, ToolRegistry, ADDRESS_MATCH_TOOL};
    use serde_json::json;

    fn actor() -> Actor {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(ADDRESS_MATCH_TOOL, AddressMatchTool::schema(), AddressMatchTool);
        Actor::new(
            Arc::new(ToolExecutor::new(registry, 5)),
            Arc::new(InMemoryShipments::with_samples()),
        )
    }

    fn query_step(order: &str) -> Step {
        Step::operation(BusinessOperation::QueryShipment, json!({"order_number": order}))
    }

    #[tokio::test]
    async fn test_one_result_per_step_in_order() {
        let plan = Plan::new(
            Intent::Query,
            vec![
                query_step("SF1234567890"),
                Step::tool("geocode", json!({"address": "北京"})),
                query_step("SF0000000000"),
            ],
        );
        let results = actor().act("s-1", &plan, &CancellationToken::new()).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert_eq!(results[1].failure_kind(), Some(ErrorKind::UnknownTool));
        assert_eq!(results[2].failure_kind(), Some(ErrorKind::ActorOperationError));
    }

    #[tokio::test]
    async fn test_dependency_failure_skips() {
        let plan = Plan::new(
            Intent::Query,
            vec![
                query_step("SF0000000000"),
                Step::tool(
                    ADDRESS_MATCH_TOOL,
                    json!({"source": {"$ref": "steps.0.current_location"}, "candidates": ["北京"]}),
                ),
                query_step("SF1234567890").after(1),
            ],
        );
        let results = actor().act("s-1", &plan, &CancellationToken::new()).await;
        assert_eq!(results[1].failure_kind(), Some(ErrorKind::SkippedDueToDependency));
        assert_eq!(results[2].failure_kind(), Some(ErrorKind::SkippedDueToDependency));
    }

    #[tokio::test]
    async fn test_refs_feed_later_steps() {
        let plan = Plan::new(
            Intent::Query,
            vec![
                query_step("SF1234567890"),
                Step::tool(
                    ADDRESS_MATCH_TOOL,
                    json!({
                        "source": {"$ref": "steps.0.current_location"},
                        "candidates": [{"$ref": "steps.0.history.2.location"}, "上海"]
                    }),
                ),
            ],
        );
        let results = actor().act("s-1", &plan, &CancellationToken::new()).await;
        assert!(results[1].is_success(), "{:?}", results[1]);
        assert_eq!(results[1].output().unwrap()["best"]["index"], 0);
    }

    #[tokio::test]
    async fn test_invalid_tool_arguments() {
        let plan = Plan::new(
            Intent::Query,
            vec![Step::tool(ADDRESS_MATCH_TOOL, json!({"source": 1}))],
        );
        let results = actor().act("s-1", &plan, &CancellationToken::new()).await;
        assert_eq!(results[0].failure_kind(), Some(ErrorKind::InvalidToolArguments));
    }

    #[tokio::test]
    async fn test_cancelled_plan_still_yields_all_results() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let plan = Plan::new(Intent::Query, vec![query_step("SF1234567890"), query_step("SF1")]);
        let results = actor().act("s-1", &plan, &cancel).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.failure_kind() == Some(ErrorKind::Cancelled)));
    }

    #[test]
    fn test_resolve_refs_missing_path() {
        let earlier = vec![ActorResult::Succeeded { output: json!({"a": {"b": 1}}) }];
        assert_eq!(
            resolve_refs(&json!({"x": {"$ref": "steps.0.a.b"}}), &earlier).unwrap(),
            json!({"x": 1})
        );
        assert!(resolve_refs(&json!({"$ref": "steps.0.a.c"}), &earlier).is_err());
    }
}
