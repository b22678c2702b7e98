use crate::types::{Delivery, Disposition, QueueOrderMessage, RelayError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 发布拦截器
#[async_trait]
pub trait PublishInterceptor: Send + Sync {
    /// 发布前
    async fn before_publish(&self, msg: &QueueOrderMessage);

    /// 发布成功后
    async fn after_publish(&self, queue_name: &str, msg: &QueueOrderMessage);

    /// 中继失败时,校验失败时 `msg` 为 `None`
    async fn publish_error(&self, msg: Option<&QueueOrderMessage>, error: &RelayError);
}

/// 投递拦截器
#[async_trait]
pub trait DeliveryInterceptor: Send + Sync {
    /// 消息处理前
    async fn before_handle(&self, delivery: &Delivery);

    /// 消息处理后
    async fn after_handle(&self, delivery: &Delivery, disposition: &Disposition);
}

/// 拦截器管理器
#[derive(Default)]
pub struct InterceptorManager {
    publish_interceptors: Vec<Arc<dyn PublishInterceptor>>,
    delivery_interceptors: Vec<Arc<dyn DeliveryInterceptor>>,
}

impl InterceptorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册发布拦截器
    pub fn register_publish_interceptor(&mut self, interceptor: Arc<dyn PublishInterceptor>) {
        self.publish_interceptors.push(interceptor);
    }

    /// 注册投递拦截器
    pub fn register_delivery_interceptor(&mut self, interceptor: Arc<dyn DeliveryInterceptor>) {
        self.delivery_interceptors.push(interceptor);
    }

    pub async fn before_publish(&self, msg: &QueueOrderMessage) {
        for interceptor in &self.publish_interceptors {
            interceptor.before_publish(msg).await;
        }
    }

    pub async fn after_publish(&self, queue_name: &str, msg: &QueueOrderMessage) {
        for interceptor in &self.publish_interceptors {
            interceptor.after_publish(queue_name, msg).await;
        }
    }

    pub async fn publish_error(&self, msg: Option<&QueueOrderMessage>, error: &RelayError) {
        for interceptor in &self.publish_interceptors {
            interceptor.publish_error(msg, error).await;
        }
    }

    pub async fn before_handle(&self, delivery: &Delivery) {
        for interceptor in &self.delivery_interceptors {
            interceptor.before_handle(delivery).await;
        }
    }

    pub async fn after_handle(&self, delivery: &Delivery, disposition: &Disposition) {
        for interceptor in &self.delivery_interceptors {
            interceptor.after_handle(delivery, disposition).await;
        }
    }
}

/// 日志拦截器,记录发布和投递的关键信息
#[derive(Debug)]
pub struct LoggingInterceptor;

#[async_trait]
impl PublishInterceptor for LoggingInterceptor {
    async fn before_publish(&self, msg: &QueueOrderMessage) {
        debug!(
            message_id = %msg.message_id,
            transaction_id = %msg.transaction_id,
            "开始发布订单消息"
        );
    }

    async fn after_publish(&self, queue_name: &str, msg: &QueueOrderMessage) {
        info!(
            message_id = %msg.message_id,
            transaction_id = %msg.transaction_id,
            queue = queue_name,
            "订单消息已发布"
        );
    }

    async fn publish_error(&self, msg: Option<&QueueOrderMessage>, error: &RelayError) {
        match msg {
            Some(msg) => warn!(
                message_id = %msg.message_id,
                transaction_id = %msg.transaction_id,
                "订单中继失败: {}",
                error
            ),
            None => warn!("订单请求被拒绝: {}", error),
        }
    }
}

#[async_trait]
impl DeliveryInterceptor for LoggingInterceptor {
    async fn before_handle(&self, delivery: &Delivery) {
        debug!(
            message_id = %delivery.message_id(),
            delivery_count = delivery.delivery_count(),
            "开始处理投递"
        );
    }

    async fn after_handle(&self, delivery: &Delivery, disposition: &Disposition) {
        debug!(
            message_id = %delivery.message_id(),
            "投递处理完成: {:?}",
            disposition
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::MemoryQueue;
    use crate::engine::{ConsumerConfig, OrderConsumer, OrderRelay};
    use crate::types::{OrderRequest, QueueEnvelope};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// 按顺序记录每次回调
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }
    }

    #[async_trait]
    impl PublishInterceptor for Recorder {
        async fn before_publish(&self, msg: &QueueOrderMessage) {
            self.push(format!("before_publish:{}", msg.transaction_id));
        }

        async fn after_publish(&self, queue_name: &str, msg: &QueueOrderMessage) {
            self.push(format!("after_publish:{}:{}", queue_name, msg.transaction_id));
        }

        async fn publish_error(&self, msg: Option<&QueueOrderMessage>, error: &RelayError) {
            let id = msg.map_or("-", |m| m.transaction_id.as_str());
            let kind = match error {
                RelayError::InvalidRequest => "invalid",
                RelayError::Transport(e) => e.reason_code(),
                RelayError::Internal(_) => "internal",
            };
            self.push(format!("publish_error:{}:{}", id, kind));
        }
    }

    #[async_trait]
    impl DeliveryInterceptor for Recorder {
        async fn before_handle(&self, delivery: &Delivery) {
            self.push(format!("before_handle:{}", delivery.delivery_count()));
        }

        async fn after_handle(&self, delivery: &Delivery, disposition: &Disposition) {
            let outcome = match disposition {
                Disposition::Complete => "complete".to_string(),
                Disposition::DeadLetter { reason, .. } => format!("dead_letter:{}", reason),
            };
            self.push(format!("after_handle:{}:{}", delivery.delivery_count(), outcome));
        }
    }

    fn delivery(body: String, count: u32) -> Delivery {
        Delivery {
            envelope: QueueEnvelope {
                message_id: Uuid::new_v4(),
                content_type: "application/json".into(),
                body,
                enqueued_at: chrono::Utc::now(),
                delivery_count: count,
            },
            receipt: "r".into(),
        }
    }

    #[tokio::test]
    async fn publish_hooks_fire_in_order() {
        let queue = Arc::new(MemoryQueue::new("orders"));
        let recorder = Arc::new(Recorder::default());
        let relay = OrderRelay::new(queue.clone()).with_interceptor(recorder.clone());

        relay.relay(br#"{"id":"ORD-1","name":"Mouse"}"#).await.unwrap();
        assert_eq!(
            recorder.take(),
            vec!["before_publish:ORD-1", "after_publish:orders:ORD-1"]
        );

        // 校验失败: 不进入发布,错误回调拿不到消息
        relay.relay(br#"{"id":"ORD-2"}"#).await.unwrap_err();
        assert_eq!(recorder.take(), vec!["publish_error:-:invalid"]);

        queue.set_available(false);
        relay.relay(br#"{"id":"ORD-3","name":"Desk"}"#).await.unwrap_err();
        assert_eq!(
            recorder.take(),
            vec![
                "before_publish:ORD-3",
                "publish_error:ORD-3:ServiceCommunicationProblem"
            ]
        );
    }

    #[tokio::test]
    async fn delivery_hooks_see_final_disposition() {
        let recorder = Arc::new(Recorder::default());
        let consumer =
            OrderConsumer::new(ConsumerConfig::default()).with_interceptor(recorder.clone());

        let order = QueueOrderMessage::from_request(&OrderRequest {
            id: "ORD-9".into(),
            name: "Lamp".into(),
        });
        let body = serde_json::to_string(&order).unwrap();

        consumer.handle(&delivery(body, 1)).await;
        consumer.handle(&delivery("{oops".to_string(), 2)).await;

        assert_eq!(
            recorder.take(),
            vec![
                "before_handle:1",
                "after_handle:1:complete",
                "before_handle:2",
                "after_handle:2:dead_letter:MalformedMessage",
            ]
        );
    }
}
