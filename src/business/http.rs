//! 订单服务 HTTP 客户端
//!
//! 对接 orderInfoService 的四个端点；请求体字段为 camelCase，会话 ID 随写操作一并上报。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

use crate::business::{
    BusinessError, BusinessOperations, NodeInsert, NodeUpdate, OperationContext, ShipmentQuery,
    StatusUpdate,
};
use crate::tools::remote::http_client;

/// 订单服务客户端
pub struct HttpOrderService {
    client: Client,
    base_url: String,
}

impl HttpOrderService {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: http_client(Duration::from_secs(timeout_secs)),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/orderInfoService/{}", self.base_url, path)
    }

    async fn read_body(response: reqwest::Response) -> Result<Value, BusinessError> {
        let status = response.status();
        if !status.is_success() {
            return Err(BusinessError::Service(format!("HTTP {status}")));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| BusinessError::Service(format!("invalid response body: {e}")))?;
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("operation rejected");
            return Err(BusinessError::Service(message.to_string()));
        }
        Ok(body)
    }

    async fn post(&self, path: &str, payload: Value) -> Result<Value, BusinessError> {
        tracing::debug!(path, payload = %payload, "order service POST");
        let response = self
            .client
            .post(self.url(path))
            .json(&payload)
            .send()
            .await
            .map_err(|e| BusinessError::Service(e.to_string()))?;
        Self::read_body(response).await
    }
}

/// 仅写入非空的可选字段
fn put_opt(map: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
        map.insert(key.to_string(), Value::String(v.to_string()));
    }
}

fn as_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[async_trait]
impl BusinessOperations for HttpOrderService {
    async fn query_shipment(
        &self,
        _ctx: &OperationContext,
        query: &ShipmentQuery,
    ) -> Result<Value, BusinessError> {
        let response = self
            .client
            .get(self.url("getOrderInfo"))
            .query(&[("orderNo", query.order_number.as_str())])
            .send()
            .await
            .map_err(|e| BusinessError::Service(e.to_string()))?;
        let body = Self::read_body(response).await?;
        let data = body.get("data").cloned().unwrap_or(body);
        if data.is_null() {
            return Err(BusinessError::NotFound(query.order_number.clone()));
        }
        Ok(data)
    }

    async fn modify_status(
        &self,
        ctx: &OperationContext,
        update: &StatusUpdate,
    ) -> Result<Value, BusinessError> {
        let mut payload = as_map(json!({
            "transportStatusName": update.transport_status_name,
            "sessionId": ctx.session_id,
        }));
        put_opt(&mut payload, "id", &update.order_id);
        put_opt(&mut payload, "orderNumber", &update.order_number);
        self.post("updateOrderInfo", Value::Object(payload)).await
    }

    async fn insert_node(
        &self,
        ctx: &OperationContext,
        node: &NodeInsert,
    ) -> Result<Value, BusinessError> {
        let mut payload = as_map(json!({
            "orderId": node.order_id,
            "sessionId": ctx.session_id,
            "statusDescription": node.status_description,
            "location": node.location,
            "occurredAtStr": node.occurred_at,
        }));
        put_opt(&mut payload, "operator", &node.operator);
        put_opt(&mut payload, "vehiclePlate", &node.vehicle_plate);
        put_opt(&mut payload, "remark", &node.remark);
        put_opt(&mut payload, "content", &node.content);
        self.post("insertLogisticsTrackInfo", Value::Object(payload)).await
    }

    async fn modify_node(
        &self,
        ctx: &OperationContext,
        node: &NodeUpdate,
    ) -> Result<Value, BusinessError> {
        let mut payload = as_map(json!({
            "orderId": node.order_id,
            "sessionId": ctx.session_id,
            "id": node.tracking_id,
            "location": node.location,
        }));
        put_opt(&mut payload, "statusDescription", &node.status_description);
        put_opt(&mut payload, "operator", &node.operator);
        put_opt(&mut payload, "vehiclePlate", &node.vehicle_plate);
        put_opt(&mut payload, "occurredAtStr", &node.occurred_at);
        put_opt(&mut payload, "remark", &node.remark);
        put_opt(&mut payload, "content", &node.content);
        self.post("updateLogisticsTrackInfo", Value::Object(payload)).await
    }
}
