use crate::components::{QueueReceiver, QueueSender};
use crate::types::{
    DeadLetter, Delivery, OutboundMessage, QueueEnvelope, TransportDescriptor, TransportError,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// 进程内队列,语义与 Redis 队列一致,用于测试和单进程运行
#[derive(Debug)]
pub struct MemoryQueue {
    name: String,
    max_message_bytes: usize,
    state: Mutex<QueueState>,
    notify: Notify,
    available: AtomicBool,
    stats: QueueStats,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<QueueEnvelope>,
    in_flight: HashMap<String, QueueEnvelope>,
    dead_letters: Vec<DeadLetter>,
}

/// 队列计数器
#[derive(Debug, Default)]
pub struct QueueStats {
    enqueued_total: AtomicU64,
    dequeued_total: AtomicU64,
    dead_lettered_total: AtomicU64,
}

impl QueueStats {
    pub fn enqueued_total(&self) -> u64 {
        self.enqueued_total.load(Ordering::SeqCst)
    }

    pub fn dequeued_total(&self) -> u64 {
        self.dequeued_total.load(Ordering::SeqCst)
    }

    pub fn dead_lettered_total(&self) -> u64 {
        self.dead_lettered_total.load(Ordering::SeqCst)
    }
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_message_bytes: usize::MAX,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            available: AtomicBool::new(true),
            stats: QueueStats::default(),
        }
    }

    pub fn with_max_message_bytes(mut self, limit: usize) -> Self {
        self.max_message_bytes = limit;
        self
    }

    /// 模拟队列服务宕机/恢复
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    /// 待投递消息数
    pub async fn len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// 按投递顺序返回待投递消息的快照
    pub async fn snapshot(&self) -> Vec<QueueEnvelope> {
        self.state.lock().await.ready.iter().cloned().collect()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }

    fn ensure_available(&self) -> Result<(), TransportError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Unavailable(format!(
                "内存队列 {} 当前不可用",
                self.name
            )))
        }
    }

    async fn try_take(&self) -> Option<Delivery> {
        let mut state = self.state.lock().await;
        let mut envelope = state.ready.pop_front()?;
        envelope.delivery_count += 1;

        let receipt = Uuid::new_v4().to_string();
        state.in_flight.insert(receipt.clone(), envelope.clone());
        self.stats.dequeued_total.fetch_add(1, Ordering::SeqCst);

        Some(Delivery { envelope, receipt })
    }

    async fn settle(&self, delivery: &Delivery) -> Result<QueueEnvelope, TransportError> {
        self.state
            .lock()
            .await
            .in_flight
            .remove(&delivery.receipt)
            .ok_or_else(|| {
                TransportError::Other(format!(
                    "消息 {} 不在处理中,可能已被结算",
                    delivery.message_id()
                ))
            })
    }
}

#[async_trait]
impl QueueSender for MemoryQueue {
    fn queue_name(&self) -> &str {
        &self.name
    }

    fn descriptor(&self) -> TransportDescriptor {
        TransportDescriptor {
            transport: "memory".to_string(),
            queue_name: self.name.clone(),
        }
    }

    async fn send(&self, msg: OutboundMessage) -> Result<(), TransportError> {
        self.ensure_available()?;
        if msg.body.len() > self.max_message_bytes {
            return Err(TransportError::MessageSizeExceeded {
                size: msg.body.len(),
                limit: self.max_message_bytes,
            });
        }

        let envelope = QueueEnvelope::new(msg);
        debug!("内存队列 {} 入队消息 {}", self.name, envelope.message_id);
        self.state.lock().await.ready.push_back(envelope);
        self.stats.enqueued_total.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
        Ok(())
    }
}

#[async_trait]
impl QueueReceiver for MemoryQueue {
    async fn recover(&self) -> Result<usize, TransportError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let orphaned: Vec<QueueEnvelope> = state.in_flight.drain().map(|(_, env)| env).collect();
        let count = orphaned.len();
        for envelope in orphaned {
            state.ready.push_front(envelope);
        }
        if count > 0 {
            self.notify.notify_one();
        }
        Ok(count)
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, TransportError> {
        let deadline = Instant::now() + wait;
        loop {
            self.ensure_available()?;
            if let Some(delivery) = self.try_take().await {
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            // 被唤醒后重新检查,其它消费者可能已取走消息
            let _ = tokio::time::timeout(deadline - now, self.notify.notified()).await;
        }
    }

    async fn complete(&self, delivery: &Delivery) -> Result<(), TransportError> {
        self.ensure_available()?;
        self.settle(delivery).await.map(|_| ())
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: &str,
        description: &str,
    ) -> Result<(), TransportError> {
        self.ensure_available()?;
        let envelope = self.settle(delivery).await?;
        self.state.lock().await.dead_letters.push(DeadLetter {
            envelope,
            reason: reason.to_string(),
            description: description.to_string(),
            dead_lettered_at: Utc::now(),
        });
        self.stats.dead_lettered_total.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn outbound(body: &str) -> OutboundMessage {
        OutboundMessage::json(Uuid::new_v4(), body.to_string())
    }

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let queue = MemoryQueue::new("orders");
        assert_ok!(queue.send(outbound("1")).await);
        assert_ok!(queue.send(outbound("2")).await);

        let first = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        let second = queue.receive(Duration::ZERO).await.unwrap().unwrap();

        assert_eq!(first.body(), "1");
        assert_eq!(second.body(), "2");
        assert_eq!(first.delivery_count(), 1);
        assert_eq!(queue.stats().enqueued_total(), 2);
        assert_eq!(queue.stats().dequeued_total(), 2);
    }

    #[tokio::test]
    async fn receive_times_out_on_empty_queue() {
        let queue = MemoryQueue::new("orders");
        let got = queue.receive(Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn waiting_receiver_is_woken_by_send() {
        let queue = Arc::new(MemoryQueue::new("orders"));
        let receiver = queue.clone();
        let handle =
            tokio::spawn(async move { receiver.receive(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.send(outbound("late")).await.unwrap();

        let delivery = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.body(), "late");
    }

    #[tokio::test]
    async fn unavailable_queue_rejects_send() {
        let queue = MemoryQueue::new("orders");
        queue.set_available(false);

        let err = queue.send(outbound("x")).await.unwrap_err();
        assert!(matches!(err, TransportError::Unavailable(_)));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn oversized_message_is_rejected() {
        let queue = MemoryQueue::new("orders").with_max_message_bytes(4);
        let err = queue.send(outbound("12345")).await.unwrap_err();
        assert_eq!(err, TransportError::MessageSizeExceeded { size: 5, limit: 4 });
    }

    #[tokio::test]
    async fn complete_and_dead_letter_settle_once() {
        let queue = MemoryQueue::new("orders");
        queue.send(outbound("a")).await.unwrap();
        queue.send(outbound("b")).await.unwrap();

        let a = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        let b = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(queue.in_flight_len().await, 2);

        queue.complete(&a).await.unwrap();
        queue.dead_letter(&b, "MalformedMessage", "bad json").await.unwrap();

        assert_err!(queue.complete(&a).await);
        assert_eq!(queue.in_flight_len().await, 0);

        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, "MalformedMessage");
        assert_eq!(dead[0].envelope.body, "b");
    }

    #[tokio::test]
    async fn recover_requeues_in_flight_messages() {
        let queue = MemoryQueue::new("orders");
        queue.send(outbound("a")).await.unwrap();
        let _lost = queue.receive(Duration::ZERO).await.unwrap().unwrap();

        assert_eq!(queue.recover().await.unwrap(), 1);
        let again = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(again.body(), "a");
        assert_eq!(again.delivery_count(), 2);
    }
}
