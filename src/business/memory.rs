//! 内存版订单服务：离线演示与测试使用

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::business::{
    BusinessError, BusinessOperations, NodeInsert, NodeUpdate, OperationContext, ShipmentQuery,
    StatusUpdate,
};

/// 物流轨迹节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackEvent {
    pub tracking_id: String,
    pub time: String,
    pub location: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_plate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
}

/// 运单记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentRecord {
    pub order_id: String,
    pub order_number: String,
    pub status: String,
    pub current_location: String,
    pub estimated_delivery: String,
    pub history: Vec<TrackEvent>,
}

/// 内存订单库（按 order_number 索引）
#[derive(Default)]
pub struct InMemoryShipments {
    records: RwLock<HashMap<String, ShipmentRecord>>,
    next_node: AtomicU64,
}

impl InMemoryShipments {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一条在途运单 SF1234567890
    pub fn with_samples() -> Self {
        let store = Self::new();
        store.insert_record(ShipmentRecord {
            order_id: "1001".into(),
            order_number: "SF1234567890".into(),
            status: "运输中".into(),
            current_location: "北京转运中心".into(),
            estimated_delivery: "2024-01-15".into(),
            history: vec![
                event("NODE_1", "2024-01-10 10:00", "深圳", "已揽收"),
                event("NODE_2", "2024-01-12 08:00", "武汉", "运输中"),
                event("NODE_3", "2024-01-13 15:00", "北京", "到达"),
            ],
        });
        store.next_node.store(3, Ordering::SeqCst);
        store
    }

    pub fn insert_record(&self, record: ShipmentRecord) {
        if let Ok(mut records) = self.records.write() {
            records.insert(record.order_number.clone(), record);
        }
    }

    pub fn get(&self, order_number: &str) -> Option<ShipmentRecord> {
        self.records.read().ok()?.get(order_number).cloned()
    }

    fn with_record<T>(
        &self,
        order_id: Option<&str>,
        order_number: Option<&str>,
        f: impl FnOnce(&mut ShipmentRecord) -> Result<T, BusinessError>,
    ) -> Result<T, BusinessError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| BusinessError::Service("shipment table poisoned".into()))?;
        let record = records.values_mut().find(|r| {
            order_number.is_some_and(|n| r.order_number == n)
                || order_id.is_some_and(|id| r.order_id == id)
        });
        match record {
            Some(record) => f(record),
            None => Err(BusinessError::NotFound(
                order_number.or(order_id).unwrap_or_default().to_string(),
            )),
        }
    }
}

fn event(id: &str, time: &str, location: &str, status: &str) -> TrackEvent {
    TrackEvent {
        tracking_id: id.into(),
        time: time.into(),
        location: location.into(),
        status: status.into(),
        vehicle_plate: None,
        operator: None,
        remark: None,
    }
}

fn to_value<T: Serialize>(v: &T) -> Result<Value, BusinessError> {
    serde_json::to_value(v).map_err(|e| BusinessError::Service(e.to_string()))
}

#[async_trait]
impl BusinessOperations for InMemoryShipments {
    async fn query_shipment(
        &self,
        _ctx: &OperationContext,
        query: &ShipmentQuery,
    ) -> Result<Value, BusinessError> {
        let record = self
            .get(&query.order_number)
            .ok_or_else(|| BusinessError::NotFound(query.order_number.clone()))?;
        to_value(&record)
    }

    async fn modify_status(
        &self,
        ctx: &OperationContext,
        update: &StatusUpdate,
    ) -> Result<Value, BusinessError> {
        self.with_record(
            update.order_id.as_deref(),
            update.order_number.as_deref(),
            |record| {
                record.status = update.transport_status_name.clone();
                Ok(serde_json::json!({
                    "order_id": record.order_id,
                    "order_number": record.order_number,
                    "session_id": ctx.session_id,
                    "transport_status_name": record.status,
                    "message": format!("物流状态已更新为: {}", record.status),
                    "updated_at": Utc::now().format("%Y-%m-%d %H:%M").to_string(),
                }))
            },
        )
    }

    async fn insert_node(
        &self,
        ctx: &OperationContext,
        node: &NodeInsert,
    ) -> Result<Value, BusinessError> {
        let id = format!("NODE_{}", self.next_node.fetch_add(1, Ordering::SeqCst) + 1);
        self.with_record(Some(&node.order_id), None, |record| {
            let mut ev = event(&id, &node.occurred_at, &node.location, &node.status_description);
            ev.vehicle_plate = node.vehicle_plate.clone();
            ev.operator = node.operator.clone();
            ev.remark = node.remark.clone();
            record.history.push(ev);
            record.current_location = node.location.clone();
            Ok(serde_json::json!({
                "order_id": record.order_id,
                "order_number": record.order_number,
                "session_id": ctx.session_id,
                "node_id": id,
                "location": node.location,
                "occurred_at": node.occurred_at,
                "vehicle_plate": node.vehicle_plate,
                "message": format!("已插入新节点: {}", node.location),
            }))
        })
    }

    async fn modify_node(
        &self,
        ctx: &OperationContext,
        node: &NodeUpdate,
    ) -> Result<Value, BusinessError> {
        self.with_record(Some(&node.order_id), None, |record| {
            let ev = record
                .history
                .iter_mut()
                .find(|e| e.tracking_id == node.tracking_id)
                .ok_or_else(|| BusinessError::NotFound(format!("track node {}", node.tracking_id)))?;
            ev.location = node.location.clone();
            if let Some(status) = &node.status_description {
                ev.status = status.clone();
            }
            if let Some(date) = &node.occurred_at {
                ev.time = date.clone();
            }
            if node.vehicle_plate.is_some() {
                ev.vehicle_plate = node.vehicle_plate.clone();
            }
            if node.operator.is_some() {
                ev.operator = node.operator.clone();
            }
            if node.remark.is_some() {
                ev.remark = node.remark.clone();
            }
            Ok(serde_json::json!({
                "order_id": record.order_id,
                "order_number": record.order_number,
                "session_id": ctx.session_id,
                "tracking_id": node.tracking_id,
                "location": node.location,
                "message": format!("物流节点已更新: {}", node.location),
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> OperationContext {
        OperationContext {
            session_id: "s-1".into(),
        }
    }

    #[tokio::test]
    async fn test_query_known_and_unknown() {
        let shipments = InMemoryShipments::with_samples();
        let found = shipments
            .query_shipment(&ctx(), &ShipmentQuery { order_number: "SF1234567890".into() })
            .await
            .unwrap();
        assert_eq!(found["status"], "运输中");

        let err = shipments
            .query_shipment(&ctx(), &ShipmentQuery { order_number: "SF0000000000".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, BusinessError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_modify_status_updates_record() {
        let shipments = InMemoryShipments::with_samples();
        let out = shipments
            .modify_status(
                &ctx(),
                &StatusUpdate {
                    order_id: None,
                    order_number: Some("SF1234567890".into()),
                    transport_status_name: "已送达".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(out["session_id"], "s-1");
        assert_eq!(shipments.get("SF1234567890").unwrap().status, "已送达");
    }

    #[tokio::test]
    async fn test_insert_then_modify_node() {
        let shipments = InMemoryShipments::with_samples();
        let inserted = shipments
            .insert_node(
                &ctx(),
                &NodeInsert {
                    order_id: "1001".into(),
                    status_description: "到达".into(),
                    location: "天津分拨中心".into(),
                    occurred_at: "2024-01-14".into(),
                    operator: None,
                    vehicle_plate: Some("京A12345".into()),
                    remark: None,
                    content: None,
                },
            )
            .await
            .unwrap();
        let node_id = inserted["node_id"].as_str().unwrap().to_string();
        assert_eq!(node_id, "NODE_4");

        shipments
            .modify_node(
                &ctx(),
                &NodeUpdate {
                    order_id: "1001".into(),
                    tracking_id: node_id,
                    location: "天津北辰分拨中心".into(),
                    status_description: None,
                    operator: None,
                    vehicle_plate: None,
                    occurred_at: None,
                    remark: None,
                    content: None,
                },
            )
            .await
            .unwrap();
        let record = shipments.get("SF1234567890").unwrap();
        assert_eq!(record.history.len(), 4);
        assert_eq!(record.history[3].location, "天津北辰分拨中心");
    }
}
