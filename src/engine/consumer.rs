use crate::aop::{DeliveryInterceptor, InterceptorManager, LoggingInterceptor};
use crate::types::{ConsumerError, Delivery, Disposition, QueueOrderMessage};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub const DEFAULT_LOG_TEMPLATE: &str = "收到订单消息: messageId=${msg.messageId} transactionId=${msg.transactionId} productName=${msg.productName} createdAt=${msg.createdAt} deliveryCount=${delivery.count}";

pub const REASON_MALFORMED: &str = "MalformedMessage";
pub const REASON_MAX_DELIVERY: &str = "MaxDeliveryCountExceeded";

/// 消息格式错误时的结算策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedPolicy {
    /// 转入死信队列,保留原始内容
    DeadLetter,
    /// 直接确认并丢弃
    Complete,
}

impl FromStr for MalformedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dead_letter" | "deadletter" => Ok(MalformedPolicy::DeadLetter),
            "complete" => Ok(MalformedPolicy::Complete),
            other => Err(format!("未知的策略 {}, 可选 dead_letter/complete", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub template: String,
    pub malformed_policy: MalformedPolicy,
    pub max_delivery_count: u32,
    /// 内存中保留的已消费消息条数
    pub history_limit: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            template: DEFAULT_LOG_TEMPLATE.to_string(),
            malformed_policy: MalformedPolicy::DeadLetter,
            max_delivery_count: 10,
            history_limit: 1000,
        }
    }
}

/// 订单消费者: 反序列化并记录消息,不做其它处理
pub struct OrderConsumer {
    config: ConsumerConfig,
    history: Mutex<VecDeque<QueueOrderMessage>>,
    interceptors: InterceptorManager,
}

impl fmt::Debug for OrderConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderConsumer")
            .field("config", &self.config)
            .finish()
    }
}

impl OrderConsumer {
    pub fn new(config: ConsumerConfig) -> Self {
        let mut interceptors = InterceptorManager::new();
        interceptors.register_delivery_interceptor(Arc::new(LoggingInterceptor));
        Self {
            config,
            history: Mutex::new(VecDeque::new()),
            interceptors,
        }
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn DeliveryInterceptor>) -> Self {
        self.interceptors.register_delivery_interceptor(interceptor);
        self
    }

    /// 最近消费成功的消息,按到达顺序
    pub async fn received(&self) -> Vec<QueueOrderMessage> {
        self.history.lock().await.iter().cloned().collect()
    }

    /// 处理一次投递,返回结算方式;任何输入都不会 panic
    pub async fn handle(&self, delivery: &Delivery) -> Disposition {
        self.interceptors.before_handle(delivery).await;
        let disposition = self.decide(delivery).await;
        self.interceptors.after_handle(delivery, &disposition).await;
        disposition
    }

    async fn decide(&self, delivery: &Delivery) -> Disposition {
        if delivery.delivery_count() > self.config.max_delivery_count {
            warn!(
                message_id = %delivery.message_id(),
                delivery_count = delivery.delivery_count(),
                "投递次数超过上限 {}",
                self.config.max_delivery_count
            );
            return Disposition::DeadLetter {
                reason: REASON_MAX_DELIVERY.to_string(),
                description: format!(
                    "delivery count {} exceeds {}",
                    delivery.delivery_count(),
                    self.config.max_delivery_count
                ),
            };
        }

        match parse_order(delivery) {
            Ok(order) => {
                self.record(delivery, order).await;
                Disposition::Complete
            }
            Err(e) => {
                error!(
                    message_id = %delivery.message_id(),
                    policy = ?self.config.malformed_policy,
                    "无法处理的订单消息: {}",
                    e
                );
                match self.config.malformed_policy {
                    MalformedPolicy::DeadLetter => Disposition::DeadLetter {
                        reason: REASON_MALFORMED.to_string(),
                        description: e.to_string(),
                    },
                    MalformedPolicy::Complete => Disposition::Complete,
                }
            }
        }
    }

    async fn record(&self, delivery: &Delivery, order: QueueOrderMessage) {
        info!(
            message_id = %order.message_id,
            transaction_id = %order.transaction_id,
            product_name = %order.product_name,
            created_at = %order.created_at,
            "{}",
            self.format_message(delivery, &order)
        );

        if self.config.history_limit == 0 {
            return;
        }
        let mut history = self.history.lock().await;
        while history.len() >= self.config.history_limit {
            history.pop_front();
        }
        history.push_back(order);
    }

    fn format_message(&self, delivery: &Delivery, order: &QueueOrderMessage) -> String {
        let mut result = self.config.template.clone();
        result = result.replace("${delivery.count}", &delivery.delivery_count().to_string());

        // 替换消息字段变量
        if let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(order) {
            for (key, value) in fields {
                let placeholder = format!("${{msg.{}}}", key);
                if result.contains(&placeholder) {
                    let value_str = match value.as_str() {
                        Some(s) => s.to_string(),
                        None => value.to_string(),
                    };
                    result = result.replace(&placeholder, &value_str);
                }
            }
        }
        result
    }
}

fn parse_order(delivery: &Delivery) -> Result<QueueOrderMessage, ConsumerError> {
    serde_json::from_str(delivery.body()).map_err(|e| ConsumerError::Malformed(e.to_string()))
}
