use crate::aop::{InterceptorManager, LoggingInterceptor, PublishInterceptor};
use crate::components::QueueSender;
use crate::types::{
    OrderRequest, OutboundMessage, QueueOrderMessage, RelayError, TransportError,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const SUCCESS_MESSAGE: &str = "Order queued successfully";

/// 中继成功后返回给调用方的确认
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayAck {
    pub success: bool,
    pub message: String,
    pub queue_name: String,
    #[serde(flatten)]
    pub order: QueueOrderMessage,
}

/// 订单中继: 校验 -> 映射 -> 发布
///
/// 每次调用互不影响,唯一共享的是 `sender`。发布只尝试一次,不重试;
/// 唯一的保护是可选的发布超时。
pub struct OrderRelay {
    sender: Arc<dyn QueueSender>,
    publish_timeout: Option<Duration>,
    interceptors: InterceptorManager,
}

impl fmt::Debug for OrderRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderRelay")
            .field("sender", &self.sender)
            .field("publish_timeout", &self.publish_timeout)
            .finish()
    }
}

impl OrderRelay {
    pub fn new(sender: Arc<dyn QueueSender>) -> Self {
        let mut interceptors = InterceptorManager::new();
        interceptors.register_publish_interceptor(Arc::new(LoggingInterceptor));
        Self {
            sender,
            publish_timeout: None,
            interceptors,
        }
    }

    /// `None` 或零表示不限时
    pub fn with_publish_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.publish_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn PublishInterceptor>) -> Self {
        self.interceptors.register_publish_interceptor(interceptor);
        self
    }

    pub fn sender(&self) -> &Arc<dyn QueueSender> {
        &self.sender
    }

    pub fn queue_name(&self) -> &str {
        self.sender.queue_name()
    }

    /// 处理一次请求体
    pub async fn relay(&self, body: &[u8]) -> Result<RelayAck, RelayError> {
        let request = match OrderRequest::parse(body) {
            Ok(req) => req,
            Err(e) => {
                self.interceptors.publish_error(None, &e).await;
                return Err(e);
            }
        };

        let order = QueueOrderMessage::from_request(&request);
        match self.publish(&order).await {
            Ok(()) => {
                self.interceptors
                    .after_publish(self.queue_name(), &order)
                    .await;
                Ok(RelayAck {
                    success: true,
                    message: SUCCESS_MESSAGE.to_string(),
                    queue_name: self.queue_name().to_string(),
                    order,
                })
            }
            Err(e) => {
                self.interceptors.publish_error(Some(&order), &e).await;
                Err(e)
            }
        }
    }

    async fn publish(&self, order: &QueueOrderMessage) -> Result<(), RelayError> {
        let body = serde_json::to_string(order)
            .map_err(|e| RelayError::Internal(format!("订单消息序列化失败: {}", e)))?;
        let outbound = OutboundMessage::json(order.message_id, body);

        self.interceptors.before_publish(order).await;

        let send = self.sender.send(outbound);
        let result = match self.publish_timeout {
            Some(limit) => match tokio::time::timeout(limit, send).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(format!(
                    "发布超过 {} 毫秒未完成",
                    limit.as_millis()
                ))),
            },
            None => send.await,
        };

        result.map_err(RelayError::from)
    }
}
