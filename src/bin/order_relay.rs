use anyhow::Context;
use order_relay::config::AppConfig;
use order_relay::server::{router, AppState};
use order_relay::utils::{init_tracing, shutdown_signal};
use order_relay::{connect, ConsumerWorker, OrderConsumer, OrderRelay, TransportKind};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("加载配置失败")?;

    // 初始化日志
    init_tracing(config.log_format);

    let client = connect(&config.queue).context("创建队列客户端失败")?;
    let relay = Arc::new(
        OrderRelay::new(client.sender.clone())
            .with_publish_timeout(config.server.publish_timeout),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_task = if config.server.embedded_consumer {
        let consumer = Arc::new(OrderConsumer::new(config.consumer.clone()));
        let worker = ConsumerWorker::new(client.receiver.clone(), consumer, config.worker.clone());
        Some(tokio::spawn(worker.run(shutdown_rx)))
    } else {
        if config.queue.transport == TransportKind::Memory {
            warn!("进程内队列未启用内嵌消费者,消息只会堆积在本进程中");
        }
        None
    };

    let app = router(AppState { relay }, &config.server.route);
    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("绑定地址 {} 失败", config.server.bind))?;
    info!(
        "订单中继已启动: POST http://{}{} -> 队列 {}",
        config.server.bind, config.server.route, config.queue.queue_name
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP 服务异常退出")?;

    // 通知内嵌消费者退出并等待在途消息处理完
    let _ = shutdown_tx.send(true);
    if let Some(task) = consumer_task {
        task.await.context("消费者任务异常退出")?;
    }
    info!("订单中继已停止");
    Ok(())
}
