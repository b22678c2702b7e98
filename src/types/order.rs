use crate::types::RelayError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// 调用方提交的订单请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    /// 调用方分配的交易号
    pub id: String,
    /// 商品名称
    pub name: String,
}

impl OrderRequest {
    /// 从原始请求体解析订单请求
    ///
    /// 字段名不区分大小写,两个字段都必须是非空字符串。
    pub fn parse(body: &[u8]) -> Result<Self, RelayError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|_| RelayError::InvalidRequest)?;
        let obj = value.as_object().ok_or(RelayError::InvalidRequest)?;

        let id = find_text(obj, "id").ok_or(RelayError::InvalidRequest)?;
        let name = find_text(obj, "name").ok_or(RelayError::InvalidRequest)?;

        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
        })
    }
}

/// 按字段名(忽略大小写)查找非空字符串,完全小写的字段优先
fn find_text<'a>(obj: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    let value = match obj.get(field) {
        Some(v) => v,
        None => obj
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(field))
            .map(|(_, v)| v)?,
    };

    value.as_str().filter(|s| !s.is_empty())
}

/// 发布到队列的订单消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueOrderMessage {
    /// 每次发布生成的唯一消息ID
    pub message_id: Uuid,
    pub transaction_id: String,
    pub product_name: String,
    /// 映射时刻(UTC)
    pub created_at: DateTime<Utc>,
}

impl QueueOrderMessage {
    pub fn from_request(req: &OrderRequest) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            transaction_id: req.id.clone(),
            product_name: req.name.clone(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_keys_case_insensitively() {
        let req = OrderRequest::parse(br#"{"Id":"ORD-12345","NAME":"Laptop Pro X1"}"#).unwrap();
        assert_eq!(
            req,
            OrderRequest {
                id: "ORD-12345".into(),
                name: "Laptop Pro X1".into(),
            }
        );
    }

    #[test]
    fn exact_lowercase_key_wins() {
        let req = OrderRequest::parse(br#"{"ID":"upper","id":"lower","name":"n"}"#).unwrap();
        assert_eq!(req.id, "lower");
    }

    #[test]
    fn rejects_missing_null_empty_and_non_string_fields() {
        let bodies: [&[u8]; 7] = [
            br#"{"name":"X"}"#,
            br#"{"id":null,"name":"X"}"#,
            br#"{"Id":"","Name":"X"}"#,
            br#"{"id":"A","name":""}"#,
            br#"{"id":42,"name":"X"}"#,
            br#"["id","name"]"#,
            b"not json",
        ];
        for body in bodies {
            assert!(
                matches!(OrderRequest::parse(body), Err(RelayError::InvalidRequest)),
                "body {:?} should be rejected",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn message_uses_camel_case_keys() {
        let req = OrderRequest {
            id: "T-1".into(),
            name: "Widget".into(),
        };
        let msg = QueueOrderMessage::from_request(&req);
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["transactionId"], "T-1");
        assert_eq!(value["productName"], "Widget");
        assert_eq!(value["messageId"], msg.message_id.to_string());
        assert!(value["createdAt"].is_string());
    }

    #[test]
    fn repeated_mapping_yields_distinct_ids() {
        let req = OrderRequest {
            id: "T-1".into(),
            name: "Widget".into(),
        };
        let a = QueueOrderMessage::from_request(&req);
        let b = QueueOrderMessage::from_request(&req);
        assert_ne!(a.message_id, b.message_id);
        assert_eq!(a.transaction_id, b.transaction_id);
    }
}
