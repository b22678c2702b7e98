use crate::components::{MemoryQueue, QueueClient, RedisQueue, RedisQueueConfig};
use crate::types::ConfigError;
use redis::{ConnectionAddr, ConnectionInfo, IntoConnectionInfo, RedisConnectionInfo};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 未配置任何连接信息时使用的默认命名空间
pub const FALLBACK_NAMESPACE: &str = "localhost:6379";

const DEFAULT_REDIS_PORT: u16 = 6379;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Redis,
    Memory,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(TransportKind::Redis),
            "memory" => Ok(TransportKind::Memory),
            other => Err(format!("未知的传输类型 {}, 可选 redis/memory", other)),
        }
    }
}

/// 运行环境提供的凭据,不出现在配置文件里
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AmbientCredential {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for AmbientCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmbientCredential")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// 队列连接来源,按优先级选择
#[derive(Clone, PartialEq, Eq)]
pub enum ConnectionSource {
    /// 显式配置的连接串
    ConnectionString(String),
    /// 完整命名空间(host:port)+ 环境凭据
    Namespace {
        namespace: String,
        credential: AmbientCredential,
    },
    /// 默认命名空间 + 环境凭据
    Fallback { credential: AmbientCredential },
}

impl fmt::Debug for ConnectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl ConnectionSource {
    pub fn resolve(
        connection_string: Option<&str>,
        namespace: Option<&str>,
        credential: AmbientCredential,
    ) -> Self {
        if let Some(conn) = non_empty(connection_string) {
            ConnectionSource::ConnectionString(conn.to_string())
        } else if let Some(ns) = non_empty(namespace) {
            ConnectionSource::Namespace {
                namespace: ns.to_string(),
                credential,
            }
        } else {
            ConnectionSource::Fallback { credential }
        }
    }

    /// 生成 Redis 连接信息
    ///
    /// 环境凭据直接写入连接信息,不经过 URL 拼接,密码里可以有 `@`、`/`、`#` 等字符。
    pub fn connection_info(&self) -> Result<ConnectionInfo, ConfigError> {
        match self {
            ConnectionSource::ConnectionString(conn) => conn
                .as_str()
                .into_connection_info()
                .map_err(|e| ConfigError::Connection(format!("Redis连接串无效: {}", e))),
            ConnectionSource::Namespace {
                namespace,
                credential,
            } => namespace_info(namespace, credential),
            ConnectionSource::Fallback { credential } => {
                namespace_info(FALLBACK_NAMESPACE, credential)
            }
        }
    }

    /// 不含密钥的描述,用于日志
    pub fn describe(&self) -> String {
        match self {
            ConnectionSource::ConnectionString(_) => "connection string".to_string(),
            ConnectionSource::Namespace { namespace, .. } => {
                format!("namespace {} (ambient credential)", namespace)
            }
            ConnectionSource::Fallback { .. } => {
                format!("fallback namespace {} (ambient credential)", FALLBACK_NAMESPACE)
            }
        }
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// 命名空间格式为 host[:port]
fn namespace_info(
    namespace: &str,
    credential: &AmbientCredential,
) -> Result<ConnectionInfo, ConfigError> {
    let (host, port) = match namespace.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|e| ConfigError::Invalid {
                key: "QUEUE_NAMESPACE".to_string(),
                value: namespace.to_string(),
                reason: format!("端口无效: {}", e),
            })?;
            (host, port)
        }
        None => (namespace, DEFAULT_REDIS_PORT),
    };
    if host.is_empty() {
        return Err(ConfigError::Invalid {
            key: "QUEUE_NAMESPACE".to_string(),
            value: namespace.to_string(),
            reason: "缺少主机名".to_string(),
        });
    }

    Ok(ConnectionInfo {
        addr: ConnectionAddr::Tcp(host.to_string(), port),
        redis: RedisConnectionInfo {
            username: credential.username.clone(),
            password: credential.password.clone(),
            ..Default::default()
        },
    })
}

/// 构造队列客户端所需的全部设置
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub transport: TransportKind,
    pub queue_name: String,
    pub source: ConnectionSource,
    pub max_message_bytes: usize,
    pub poll_interval: Duration,
    /// 建立连接失败后的重试次数,0 表示只尝试一次
    pub connect_retries: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            transport: TransportKind::Redis,
            queue_name: "orders".to_string(),
            source: ConnectionSource::Fallback {
                credential: AmbientCredential::default(),
            },
            max_message_bytes: 256 * 1024,
            poll_interval: Duration::from_millis(100),
            connect_retries: 0,
        }
    }
}

/// 根据设置构造队列客户端,调用方只拿到发送端/接收端两个接口
pub fn connect(settings: &QueueSettings) -> Result<QueueClient, ConfigError> {
    match settings.transport {
        TransportKind::Redis => {
            info!(
                "使用 Redis 队列 {}, 连接来源: {}",
                settings.queue_name,
                settings.source.describe()
            );
            let queue = RedisQueue::new(RedisQueueConfig {
                connection: settings.source.connection_info()?,
                queue_name: settings.queue_name.clone(),
                max_message_bytes: settings.max_message_bytes,
                poll_interval: settings.poll_interval,
                connect_retries: settings.connect_retries,
            })?;
            Ok(QueueClient::new(Arc::new(queue)))
        }
        TransportKind::Memory => {
            info!("使用进程内队列 {}", settings.queue_name);
            let queue = MemoryQueue::new(settings.queue_name.clone())
                .with_max_message_bytes(settings.max_message_bytes);
            Ok(QueueClient::new(Arc::new(queue)))
        }
    }
}
