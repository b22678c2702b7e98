//! 进程配置,全部来自环境变量
//!
//! 未设置的变量使用默认值,格式不对的变量返回 [`ConfigError::Invalid`]。

use crate::components::{AmbientCredential, ConnectionSource, QueueSettings, TransportKind};
use crate::engine::{ConsumerConfig, MalformedPolicy, WorkerConfig};
use crate::types::ConfigError;
use crate::utils::LogFormat;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// 中继接口路径
    pub route: String,
    /// `None` 表示发布不限时
    pub publish_timeout: Option<Duration>,
    /// 在中继进程内同时运行消费者
    pub embedded_consumer: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 7071)),
            route: "/api/orders".to_string(),
            publish_timeout: Some(Duration::from_secs(30)),
            embedded_consumer: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub queue: QueueSettings,
    pub consumer: ConsumerConfig,
    pub worker: WorkerConfig,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let defaults = AppConfig::default();

        let route = env
            .get("RELAY_ROUTE")
            .unwrap_or(defaults.server.route);
        if !route.starts_with('/') {
            return Err(invalid("RELAY_ROUTE", &route, "路径必须以 / 开头"));
        }

        let publish_timeout_ms: u64 = env.parse("RELAY_PUBLISH_TIMEOUT_MS", 30_000)?;
        let server = ServerConfig {
            bind: env.parse("RELAY_BIND", defaults.server.bind)?,
            route,
            publish_timeout: Some(Duration::from_millis(publish_timeout_ms))
                .filter(|t| !t.is_zero()),
            embedded_consumer: env.parse("RELAY_EMBEDDED_CONSUMER", false)?,
        };

        let queue_name = env
            .get("QUEUE_NAME")
            .unwrap_or(defaults.queue.queue_name);
        if queue_name.trim().is_empty() {
            return Err(invalid("QUEUE_NAME", &queue_name, "队列名不能为空"));
        }

        let credential = AmbientCredential {
            username: env.get("QUEUE_USERNAME"),
            password: env.get("QUEUE_PASSWORD"),
        };
        let queue = QueueSettings {
            transport: env.parse("QUEUE_TRANSPORT", TransportKind::Redis)?,
            queue_name,
            source: ConnectionSource::resolve(
                env.get("QUEUE_CONNECTION_STRING").as_deref(),
                env.get("QUEUE_NAMESPACE").as_deref(),
                credential,
            ),
            max_message_bytes: env.parse("QUEUE_MAX_MESSAGE_BYTES", defaults.queue.max_message_bytes)?,
            poll_interval: Duration::from_millis(env.parse("QUEUE_POLL_INTERVAL_MS", 100)?),
            connect_retries: env.parse("QUEUE_CONNECT_RETRIES", defaults.queue.connect_retries)?,
        };

        let consumer = ConsumerConfig {
            template: env
                .get("CONSUMER_LOG_TEMPLATE")
                .unwrap_or(defaults.consumer.template),
            malformed_policy: env.parse("CONSUMER_MALFORMED_POLICY", MalformedPolicy::DeadLetter)?,
            max_delivery_count: env.parse(
                "CONSUMER_MAX_DELIVERY_COUNT",
                defaults.consumer.max_delivery_count,
            )?,
            history_limit: defaults.consumer.history_limit,
        };

        let concurrency: usize = env.parse("CONSUMER_CONCURRENCY", 1)?;
        if concurrency == 0 {
            return Err(invalid("CONSUMER_CONCURRENCY", "0", "至少需要一个处理槽"));
        }
        let worker = WorkerConfig {
            concurrency,
            receive_wait: Duration::from_millis(env.parse("CONSUMER_RECEIVE_WAIT_MS", 5_000)?),
            error_backoff: Duration::from_millis(env.parse("CONSUMER_ERROR_BACKOFF_MS", 1_000)?),
            recover_on_start: env.parse("CONSUMER_RECOVER_ON_START", true)?,
        };

        Ok(Self {
            server,
            queue,
            consumer,
            worker,
            log_format: env.parse("LOG_FORMAT", LogFormat::Text)?,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// 空字符串视为未设置
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
            None => Ok(default),
        }
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use redis::ConnectionAddr;
    use std::collections::HashMap;

    fn target(config: &AppConfig) -> (String, u16, Option<String>) {
        let info = config.queue.source.connection_info().unwrap();
        match info.addr {
            ConnectionAddr::Tcp(host, port) => (host, port, info.redis.password),
            other => panic!("unexpected address: {:?}", other),
        }
    }

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server.route, "/api/orders");
        assert_eq!(config.server.bind.port(), 7071);
        assert_eq!(config.server.publish_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.queue.queue_name, "orders");
        assert_eq!(config.queue.transport, TransportKind::Redis);
        assert_eq!(target(&config), ("localhost".to_string(), 6379, None));
        assert_eq!(config.queue.connect_retries, 0);
        assert_eq!(config.consumer.malformed_policy, MalformedPolicy::DeadLetter);
        assert_eq!(config.worker.concurrency, 1);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            ("RELAY_ROUTE", "/api/SendOrder"),
            ("RELAY_PUBLISH_TIMEOUT_MS", "0"),
            ("QUEUE_TRANSPORT", "memory"),
            ("QUEUE_NAMESPACE", "queue.internal:6380"),
            ("QUEUE_PASSWORD", "pw"),
            ("QUEUE_CONNECT_RETRIES", "3"),
            ("CONSUMER_CONCURRENCY", "4"),
            ("CONSUMER_MALFORMED_POLICY", "complete"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(config.server.route, "/api/SendOrder");
        assert_eq!(config.server.publish_timeout, None);
        assert_eq!(config.queue.transport, TransportKind::Memory);
        assert_eq!(
            target(&config),
            ("queue.internal".to_string(), 6380, Some("pw".to_string()))
        );
        assert_eq!(config.queue.connect_retries, 3);
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.consumer.malformed_policy, MalformedPolicy::Complete);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn invalid_values_name_the_key() {
        let err = load(&[("CONSUMER_CONCURRENCY", "many")]).unwrap_err();
        match err {
            ConfigError::Invalid { key, .. } => assert_eq!(key, "CONSUMER_CONCURRENCY"),
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(load(&[("RELAY_ROUTE", "api/orders")]).is_err());
        assert!(load(&[("QUEUE_TRANSPORT", "kafka")]).is_err());
        assert!(load(&[("CONSUMER_CONCURRENCY", "0")]).is_err());
        assert!(load(&[("QUEUE_CONNECT_RETRIES", "-1")]).is_err());
    }
}
