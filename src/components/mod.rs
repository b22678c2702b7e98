mod connection;
mod memory;
mod redis_queue;

pub use connection::{connect, AmbientCredential, ConnectionSource, QueueSettings, TransportKind};
pub use memory::{MemoryQueue, QueueStats};
pub use redis_queue::{RedisQueue, RedisQueueConfig};

use crate::types::{Delivery, OutboundMessage, TransportDescriptor, TransportError};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// 队列发送端
///
/// 实现必须可以在多个并发请求之间共享同一个实例。
#[async_trait]
pub trait QueueSender: Debug + Send + Sync {
    fn queue_name(&self) -> &str;

    fn descriptor(&self) -> TransportDescriptor;

    /// 发送一条消息,不做重试
    async fn send(&self, msg: OutboundMessage) -> Result<(), TransportError>;
}

/// 队列接收端
#[async_trait]
pub trait QueueReceiver: Debug + Send + Sync {
    /// 把上次异常退出时遗留的在途消息放回队列,返回恢复的数量
    async fn recover(&self) -> Result<usize, TransportError>;

    /// 最多等待 `wait`,超时返回 `None`
    ///
    /// 取消进行中的接收不安全: 消息可能已移入处理中,只有下一次 `recover` 才会放回队列。
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, TransportError>;

    async fn complete(&self, delivery: &Delivery) -> Result<(), TransportError>;

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: &str,
        description: &str,
    ) -> Result<(), TransportError>;
}

/// 指向同一个队列的发送端和接收端
#[derive(Debug, Clone)]
pub struct QueueClient {
    pub sender: Arc<dyn QueueSender>,
    pub receiver: Arc<dyn QueueReceiver>,
}

impl QueueClient {
    pub fn new<Q>(queue: Arc<Q>) -> Self
    where
        Q: QueueSender + QueueReceiver + 'static,
    {
        Self {
            sender: queue.clone(),
            receiver: queue,
        }
    }
}
