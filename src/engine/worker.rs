use crate::components::QueueReceiver;
use crate::engine::OrderConsumer;
use crate::types::{Delivery, Disposition};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// 并行的处理槽数量,每个槽一次只处理一条消息
    pub concurrency: usize,
    pub receive_wait: Duration,
    /// 接收或结算失败后的等待时间
    pub error_backoff: Duration,
    /// 启动时把遗留的在途消息放回队列
    pub recover_on_start: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            receive_wait: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
            recover_on_start: true,
        }
    }
}

/// 消费循环: 接收 -> 处理 -> 结算
#[derive(Debug, Clone)]
pub struct ConsumerWorker {
    receiver: Arc<dyn QueueReceiver>,
    consumer: Arc<OrderConsumer>,
    config: WorkerConfig,
}

impl ConsumerWorker {
    pub fn new(
        receiver: Arc<dyn QueueReceiver>,
        consumer: Arc<OrderConsumer>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            receiver,
            consumer,
            config,
        }
    }

    /// 运行直到 `shutdown` 变为 true 或发送端被丢弃,正在处理的消息会先处理完
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        if self.config.recover_on_start {
            match self.receiver.recover().await {
                Ok(0) => {}
                Ok(n) => info!("已把 {} 条遗留的在途消息放回队列", n),
                Err(e) => warn!("恢复在途消息失败: {}", e),
            }
        }

        let slots = self.config.concurrency.max(1);
        info!("消费者启动, 处理槽数量: {}", slots);
        join_all((0..slots).map(|slot| self.slot(slot, shutdown.clone()))).await;
        info!("消费者已停止");
    }

    async fn slot(&self, slot: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            // 发送端被丢弃时 has_changed 返回错误
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                break;
            }

            // 不在接收中途取消: Redis 的 LMOVE 可能已执行,取消会把消息留在处理列表。
            // 退出延迟最多为 receive_wait。
            let received = self.receiver.receive(self.config.receive_wait).await;

            match received {
                Ok(Some(delivery)) => self.process(&delivery).await,
                Ok(None) => debug!(slot, "暂无消息"),
                Err(e) => {
                    warn!(slot, "接收消息失败: {}", e);
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }
    }

    async fn process(&self, delivery: &Delivery) {
        let settled = match self.consumer.handle(delivery).await {
            Disposition::Complete => self.receiver.complete(delivery).await,
            Disposition::DeadLetter {
                reason,
                description,
            } => {
                self.receiver
                    .dead_letter(delivery, &reason, &description)
                    .await
            }
        };

        if let Err(e) = settled {
            // 结算失败的消息留在处理列表中,重启恢复后会再次投递
            warn!(
                message_id = %delivery.message_id(),
                "结算消息失败: {}",
                e
            );
            tokio::time::sleep(self.config.error_backoff).await;
        }
    }
}
