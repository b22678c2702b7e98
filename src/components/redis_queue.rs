use crate::components::{QueueReceiver, QueueSender};
use crate::types::{
    ConfigError, DeadLetter, Delivery, OutboundMessage, QueueEnvelope, TransportDescriptor,
    TransportError,
};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{
    cmd, pipe, AsyncCommands, Client, ConnectionAddr, ConnectionInfo, ErrorKind, RedisError,
};
use std::fmt;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct RedisQueueConfig {
    /// 连接信息,可能包含密码,不要写日志
    pub connection: ConnectionInfo,
    pub queue_name: String,
    pub max_message_bytes: usize,
    /// 队列为空时的轮询间隔
    pub poll_interval: Duration,
    /// 建立连接失败后的重试次数
    pub connect_retries: usize,
}

impl fmt::Debug for RedisQueueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQueueConfig")
            .field("addr", &self.connection.addr)
            .field("queue_name", &self.queue_name)
            .field("max_message_bytes", &self.max_message_bytes)
            .field("poll_interval", &self.poll_interval)
            .field("connect_retries", &self.connect_retries)
            .finish()
    }
}

impl Default for RedisQueueConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionInfo {
                addr: ConnectionAddr::Tcp("localhost".to_string(), 6379),
                redis: Default::default(),
            },
            queue_name: "orders".to_string(),
            max_message_bytes: 256 * 1024,
            poll_interval: Duration::from_millis(100),
            connect_retries: 0,
        }
    }
}

/// 基于 Redis 列表的队列
///
/// - `{queue}`            待投递消息,LPUSH 入队,从右侧取出
/// - `{queue}:processing` 已投递未结算的消息
/// - `{queue}:deadletter` 死信记录
///
/// 连接在第一次使用时建立。建立失败时按 `connect_retries` 重试(指数退避),
/// 默认 0 次,即失败立即返回给调用方。建立之后连接断开,`ConnectionManager`
/// 会在后台重连,但失败的那条命令不会重放,错误照常返回。
pub struct RedisQueue {
    config: RedisQueueConfig,
    client: Client,
    conn: OnceCell<ConnectionManager>,
    ready_key: String,
    processing_key: String,
    dead_letter_key: String,
}

impl fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQueue")
            .field("queue_name", &self.config.queue_name)
            .field("connected", &self.conn.initialized())
            .finish()
    }
}

impl RedisQueue {
    /// 校验连接地址,连接在第一次使用时才建立
    pub fn new(config: RedisQueueConfig) -> Result<Self, ConfigError> {
        let client = Client::open(config.connection.clone())
            .map_err(|e| ConfigError::Connection(format!("Redis连接信息无效: {}", e)))?;

        let name = &config.queue_name;
        Ok(Self {
            ready_key: name.clone(),
            processing_key: format!("{}:processing", name),
            dead_letter_key: format!("{}:deadletter", name),
            client,
            conn: OnceCell::new(),
            config,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, TransportError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let manager_config =
                    ConnectionManagerConfig::new().set_number_of_retries(self.config.connect_retries);
                let conn = self
                    .client
                    .get_connection_manager_with_config(manager_config)
                    .await?;
                info!("已连接 Redis 队列 {}", self.config.queue_name);
                Ok::<_, RedisError>(conn)
            })
            .await
            .map_err(classify)?;
        Ok(conn.clone())
    }

    async fn try_take(
        &self,
        conn: &mut ConnectionManager,
    ) -> Result<Option<Delivery>, TransportError> {
        let raw: Option<String> = cmd("LMOVE")
            .arg(&self.ready_key)
            .arg(&self.processing_key)
            .arg("RIGHT")
            .arg("LEFT")
            .query_async(conn)
            .await
            .map_err(classify)?;

        Ok(raw.map(|raw| {
            let mut envelope = parse_envelope(&raw);
            envelope.delivery_count += 1;
            Delivery {
                envelope,
                receipt: raw,
            }
        }))
    }
}

/// 无法解析的信封原样交给消费端,由消费端按格式错误处理
fn parse_envelope(raw: &str) -> QueueEnvelope {
    match serde_json::from_str::<QueueEnvelope>(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Redis队列中存在无法解析的信封: {}", e);
            QueueEnvelope {
                message_id: Uuid::nil(),
                content_type: "application/octet-stream".to_string(),
                body: raw.to_string(),
                enqueued_at: Utc::now(),
                delivery_count: 0,
            }
        }
    }
}

/// 把 Redis 错误归类为传输层错误
fn classify(err: RedisError) -> TransportError {
    let detail = err.to_string();
    if err.kind() == ErrorKind::AuthenticationFailed
        || matches!(err.code(), Some("NOAUTH") | Some("WRONGPASS") | Some("NOPERM"))
    {
        TransportError::Unauthorized(detail)
    } else if err.code() == Some("OOM") {
        TransportError::QuotaExceeded(detail)
    } else if err.is_timeout() {
        TransportError::Timeout(detail)
    } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        TransportError::Unavailable(detail)
    } else {
        TransportError::Other(detail)
    }
}

#[async_trait]
impl QueueSender for RedisQueue {
    fn queue_name(&self) -> &str {
        &self.config.queue_name
    }

    fn descriptor(&self) -> TransportDescriptor {
        TransportDescriptor {
            transport: "redis".to_string(),
            queue_name: self.config.queue_name.clone(),
        }
    }

    async fn send(&self, msg: OutboundMessage) -> Result<(), TransportError> {
        if msg.body.len() > self.config.max_message_bytes {
            return Err(TransportError::MessageSizeExceeded {
                size: msg.body.len(),
                limit: self.config.max_message_bytes,
            });
        }

        let envelope = QueueEnvelope::new(msg);
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;

        let mut conn = self.connection().await?;
        let length: i64 = conn
            .lpush(&self.ready_key, payload)
            .await
            .map_err(classify)?;
        debug!(
            "Redis LPUSH {} 消息 {}, 队列长度 {}",
            self.ready_key, envelope.message_id, length
        );
        Ok(())
    }
}

#[async_trait]
impl QueueReceiver for RedisQueue {
    async fn recover(&self) -> Result<usize, TransportError> {
        let mut conn = self.connection().await?;
        let orphaned: Vec<String> = conn
            .lrange(&self.processing_key, 0, -1)
            .await
            .map_err(classify)?;

        let mut recovered = 0;
        for raw in orphaned {
            let mut envelope = parse_envelope(&raw);
            envelope.delivery_count += 1;
            let payload = serde_json::to_string(&envelope)
                .map_err(|e| TransportError::Serialization(e.to_string()))?;

            // 放到右侧,下一次 LMOVE 优先取到
            let (removed,): (i64,) = pipe()
                .atomic()
                .lrem(&self.processing_key, 1, &raw)
                .rpush(&self.ready_key, payload)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(classify)?;
            if removed > 0 {
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, TransportError> {
        let deadline = Instant::now() + wait;
        let mut conn = self.connection().await?;
        loop {
            if let Some(delivery) = self.try_take(&mut conn).await? {
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    async fn complete(&self, delivery: &Delivery) -> Result<(), TransportError> {
        let mut conn = self.connection().await?;
        let removed: i64 = conn
            .lrem(&self.processing_key, 1, &delivery.receipt)
            .await
            .map_err(classify)?;
        if removed == 0 {
            return Err(TransportError::Other(format!(
                "消息 {} 不在处理中,可能已被结算",
                delivery.message_id()
            )));
        }
        Ok(())
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: &str,
        description: &str,
    ) -> Result<(), TransportError> {
        let record = DeadLetter {
            envelope: delivery.envelope.clone(),
            reason: reason.to_string(),
            description: description.to_string(),
            dead_lettered_at: Utc::now(),
        };
        let payload = serde_json::to_string(&record)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;

        let mut conn = self.connection().await?;
        let (removed,): (i64,) = pipe()
            .atomic()
            .lpush(&self.dead_letter_key, payload)
            .ignore()
            .lrem(&self.processing_key, 1, &delivery.receipt)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        if removed == 0 {
            warn!(
                "死信消息 {} 已不在处理列表中",
                delivery.message_id()
            );
        }
        Ok(())
    }
}
