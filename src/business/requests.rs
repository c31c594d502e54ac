//! 业务请求类型与校验规则
//!
//! 参数名兼容 LLM 常见写法（如 `tracking_number` / `node_location` / `occurred_at_str`）。

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::business::BusinessError;

/// 允许的运输状态
pub const VALID_TRANSPORT_STATUSES: [&str; 5] = ["待提货", "运输中", "已送达", "已回单", "异常滞留"];

fn require(field: &str, value: &str) -> Result<(), BusinessError> {
    if value.trim().is_empty() {
        return Err(BusinessError::InvalidRequest(format!("missing {field}")));
    }
    Ok(())
}

/// 日期必须为 yyyy-MM-dd 且是真实日期
fn check_date(value: &str) -> Result<(), BusinessError> {
    let well_formed = value.len() == 10 && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok();
    if !well_formed {
        return Err(BusinessError::InvalidRequest(format!(
            "occurred_at must be yyyy-MM-dd, got '{value}'"
        )));
    }
    Ok(())
}

/// 运单查询
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentQuery {
    #[serde(alias = "tracking_number", alias = "order_no")]
    pub order_number: String,
}

impl ShipmentQuery {
    pub fn validate(&self) -> Result<(), BusinessError> {
        require("order_number", &self.order_number)
    }
}

/// 修改运输状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default, alias = "tracking_number")]
    pub order_number: Option<String>,
    #[serde(alias = "target_status", alias = "status")]
    pub transport_status_name: String,
}

impl StatusUpdate {
    pub fn validate(&self) -> Result<(), BusinessError> {
        let has_id = self.order_id.as_deref().is_some_and(|s| !s.trim().is_empty())
            || self.order_number.as_deref().is_some_and(|s| !s.trim().is_empty());
        if !has_id {
            return Err(BusinessError::InvalidRequest(
                "missing order identifier (order_id or order_number)".into(),
            ));
        }
        if !VALID_TRANSPORT_STATUSES.contains(&self.transport_status_name.as_str()) {
            return Err(BusinessError::InvalidRequest(format!(
                "invalid transport status '{}', expected one of: {}",
                self.transport_status_name,
                VALID_TRANSPORT_STATUSES.join(", ")
            )));
        }
        Ok(())
    }
}

/// 插入物流节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInsert {
    pub order_id: String,
    pub status_description: String,
    #[serde(alias = "node_location")]
    pub location: String,
    #[serde(alias = "occurred_at_str")]
    pub occurred_at: String,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub vehicle_plate: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl NodeInsert {
    pub fn validate(&self) -> Result<(), BusinessError> {
        require("order_id", &self.order_id)?;
        require("status_description", &self.status_description)?;
        require("location", &self.location)?;
        require("occurred_at", &self.occurred_at)?;
        check_date(&self.occurred_at)
    }
}

/// 修改物流节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub order_id: String,
    pub tracking_id: String,
    #[serde(alias = "node_location")]
    pub location: String,
    #[serde(default)]
    pub status_description: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub vehicle_plate: Option<String>,
    #[serde(default, alias = "occurred_at_str")]
    pub occurred_at: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl NodeUpdate {
    pub fn validate(&self) -> Result<(), BusinessError> {
        require("order_id", &self.order_id)?;
        require("tracking_id", &self.tracking_id)?;
        require("location", &self.location)?;
        match &self.occurred_at {
            Some(date) => check_date(date),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_update_requires_identifier() {
        let update: StatusUpdate =
            serde_json::from_value(json!({"transport_status_name": "已送达"})).unwrap();
        assert!(update.validate().is_err());

        let update: StatusUpdate =
            serde_json::from_value(json!({"tracking_number": "SF1", "target_status": "已送达"}))
                .unwrap();
        assert!(update.validate().is_ok());
    }

    #[test]
    fn test_node_insert_date_format() {
        let mut node: NodeInsert = serde_json::from_value(json!({
            "order_id": "O-1",
            "status_description": "到达",
            "node_location": "北京转运中心",
            "occurred_at_str": "2024-01-13"
        }))
        .unwrap();
        assert!(node.validate().is_ok());

        node.occurred_at = "2024/01/13".into();
        assert!(node.validate().is_err());
        node.occurred_at = "2024-02-30".into();
        assert!(node.validate().is_err());
    }

    #[test]
    fn test_node_update_optional_date() {
        let node: NodeUpdate = serde_json::from_value(json!({
            "order_id": "O-1",
            "tracking_id": "NODE_1",
            "location": "武汉"
        }))
        .unwrap();
        assert!(node.validate().is_ok());
    }
}
