use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// 待发送的传输层消息
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// 传输层消息ID,与订单消息的 messageId 相同
    pub message_id: Uuid,
    pub content_type: String,
    pub body: String,
}

impl OutboundMessage {
    pub fn json(message_id: Uuid, body: String) -> Self {
        Self {
            message_id,
            content_type: CONTENT_TYPE_JSON.to_string(),
            body,
        }
    }
}

/// 队列中实际存储的信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEnvelope {
    pub message_id: Uuid,
    pub content_type: String,
    pub body: String,
    pub enqueued_at: DateTime<Utc>,
    /// 已投递次数,首次投递时为 1
    #[serde(default)]
    pub delivery_count: u32,
}

impl QueueEnvelope {
    pub fn new(msg: OutboundMessage) -> Self {
        Self {
            message_id: msg.message_id,
            content_type: msg.content_type,
            body: msg.body,
            enqueued_at: Utc::now(),
            delivery_count: 0,
        }
    }
}

/// 死信记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub envelope: QueueEnvelope,
    pub reason: String,
    pub description: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// 消费端收到的一次投递
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: QueueEnvelope,
    /// 结算(complete/dead-letter)时使用的凭据,由传输层解释
    pub receipt: String,
}

impl Delivery {
    pub fn message_id(&self) -> Uuid {
        self.envelope.message_id
    }

    pub fn body(&self) -> &str {
        &self.envelope.body
    }

    pub fn delivery_count(&self) -> u32 {
        self.envelope.delivery_count
    }
}

/// 消费端对一次投递的结算结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Complete,
    DeadLetter { reason: String, description: String },
}
