//! 业务操作层：运单查询、运输状态修改、物流节点插入/修改
//!
//! 真实副作用由外部订单服务承担（`HttpOrderService`）；`InMemoryShipments` 用于测试与离线演示。
//! 执行智能体只通过 [`execute`] 调用：先把计划参数解析为强类型请求并校验，再分发到具体实现。

pub mod http;
pub mod memory;
pub mod requests;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use http::HttpOrderService;
pub use memory::InMemoryShipments;
pub use requests::{NodeInsert, NodeUpdate, ShipmentQuery, StatusUpdate, VALID_TRANSPORT_STATUSES};

/// 业务操作名（计划中 `op` 字段的取值）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessOperation {
    QueryShipment,
    ModifyStatus,
    InsertNode,
    ModifyNode,
}

impl BusinessOperation {
    pub const ALL: [BusinessOperation; 4] = [
        BusinessOperation::QueryShipment,
        BusinessOperation::ModifyStatus,
        BusinessOperation::InsertNode,
        BusinessOperation::ModifyNode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessOperation::QueryShipment => "query_shipment",
            BusinessOperation::ModifyStatus => "modify_status",
            BusinessOperation::InsertNode => "insert_node",
            BusinessOperation::ModifyNode => "modify_node",
        }
    }
}

impl fmt::Display for BusinessOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BusinessOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BusinessOperation::ALL
            .into_iter()
            .find(|op| op.as_str() == s.trim())
            .ok_or_else(|| format!("unknown business operation: {s}"))
    }
}

/// 业务失败：对外统一为 ActorOperationError
#[derive(Error, Debug)]
pub enum BusinessError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("shipment not found: {0}")]
    NotFound(String),

    #[error("order service error: {0}")]
    Service(String),
}

/// 调用上下文（会话 ID 用于审计追踪）
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    pub session_id: String,
}

/// 订单服务接口
#[async_trait]
pub trait BusinessOperations: Send + Sync {
    async fn query_shipment(
        &self,
        ctx: &OperationContext,
        query: &ShipmentQuery,
    ) -> Result<Value, BusinessError>;

    async fn modify_status(
        &self,
        ctx: &OperationContext,
        update: &StatusUpdate,
    ) -> Result<Value, BusinessError>;

    async fn insert_node(
        &self,
        ctx: &OperationContext,
        node: &NodeInsert,
    ) -> Result<Value, BusinessError>;

    async fn modify_node(
        &self,
        ctx: &OperationContext,
        node: &NodeUpdate,
    ) -> Result<Value, BusinessError>;
}

fn parse_args<T: serde::de::DeserializeOwned>(op: BusinessOperation, args: &Value) -> Result<T, BusinessError> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args.clone()
    };
    serde_json::from_value(args)
        .map_err(|e| BusinessError::InvalidRequest(format!("{op}: {e}")))
}

/// 解析参数、校验并执行一个业务操作
pub async fn execute(
    ops: &dyn BusinessOperations,
    ctx: &OperationContext,
    op: BusinessOperation,
    args: &Value,
) -> Result<Value, BusinessError> {
    match op {
        BusinessOperation::QueryShipment => {
            let query: ShipmentQuery = parse_args(op, args)?;
            query.validate()?;
            ops.query_shipment(ctx, &query).await
        }
        BusinessOperation::ModifyStatus => {
            let update: StatusUpdate = parse_args(op, args)?;
            update.validate()?;
            ops.modify_status(ctx, &update).await
        }
        BusinessOperation::InsertNode => {
            let node: NodeInsert = parse_args(op, args)?;
            node.validate()?;
            ops.insert_node(ctx, &node).await
        }
        BusinessOperation::ModifyNode => {
            let node: NodeUpdate = parse_args(op, args)?;
            node.validate()?;
            ops.modify_node(ctx, &node).await
        }
    }
}
