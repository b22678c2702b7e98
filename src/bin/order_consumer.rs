use anyhow::Context;
use order_relay::config::AppConfig;
use order_relay::utils::{init_tracing, shutdown_signal};
use order_relay::{connect, ConsumerWorker, OrderConsumer, TransportKind};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("加载配置失败")?;

    // 初始化日志
    init_tracing(config.log_format);

    if config.queue.transport == TransportKind::Memory {
        warn!("独立消费者使用进程内队列,不会收到中继进程发布的消息");
    }

    let client = connect(&config.queue).context("创建队列客户端失败")?;
    let consumer = Arc::new(OrderConsumer::new(config.consumer.clone()));
    let worker = ConsumerWorker::new(client.receiver, consumer, config.worker.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    info!(
        "订单消费者已启动: 队列 {}, 处理槽 {}",
        config.queue.queue_name, config.worker.concurrency
    );
    worker.run(shutdown_rx).await;
    Ok(())
}
