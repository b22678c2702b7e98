use thiserror::Error;

/// 请求校验失败时返回给调用方的统一文案
pub const INVALID_REQUEST_MESSAGE: &str = "Invalid request: Id and Name are required";

/// 中继处理订单时的错误分类
#[derive(Error, Debug)]
pub enum RelayError {
    /// 请求体缺少 id/name,或者不是合法的 JSON 对象
    #[error("Invalid request: Id and Name are required")]
    InvalidRequest,

    /// 发布到队列失败
    #[error("Failed to queue order: {0}")]
    Transport(TransportError),

    /// 其它意料之外的错误,详情只写日志
    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<TransportError> for RelayError {
    /// 序列化失败不是队列服务的问题,按内部错误处理
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Serialization(detail) => {
                RelayError::Internal(format!("消息序列化失败: {}", detail))
            }
            other => RelayError::Transport(other),
        }
    }
}

/// 队列传输层错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("队列服务不可达: {0}")]
    Unavailable(String),

    #[error("队列认证失败: {0}")]
    Unauthorized(String),

    #[error("队列配额已满: {0}")]
    QuotaExceeded(String),

    #[error("消息大小 {size} 超过上限 {limit}")]
    MessageSizeExceeded { size: usize, limit: usize },

    #[error("队列操作超时: {0}")]
    Timeout(String),

    #[error("消息序列化失败: {0}")]
    Serialization(String),

    #[error("队列操作失败: {0}")]
    Other(String),
}

impl TransportError {
    /// 返回给调用方的原因码,不包含任何连接细节
    pub fn reason_code(&self) -> &'static str {
        match self {
            TransportError::Unavailable(_) => "ServiceCommunicationProblem",
            TransportError::Unauthorized(_) => "Unauthorized",
            TransportError::QuotaExceeded(_) => "QuotaExceeded",
            TransportError::MessageSizeExceeded { .. } => "MessageSizeExceeded",
            TransportError::Timeout(_) => "ServiceTimeout",
            TransportError::Serialization(_) | TransportError::Other(_) => "GeneralError",
        }
    }
}

/// 消费端错误
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("消息格式错误: {0}")]
    Malformed(String),
}

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置项 {key} 的值 {value:?} 无效: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("创建队列客户端失败: {0}")]
    Connection(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(
            TransportError::Unavailable("down".into()).reason_code(),
            "ServiceCommunicationProblem"
        );
        assert_eq!(
            TransportError::MessageSizeExceeded { size: 10, limit: 1 }.reason_code(),
            "MessageSizeExceeded"
        );
        assert_eq!(
            TransportError::Serialization("bad".into()).reason_code(),
            "GeneralError"
        );
    }

    #[test]
    fn serialization_failure_is_internal() {
        let err = RelayError::from(TransportError::Serialization("bad".into()));
        assert!(matches!(err, RelayError::Internal(_)));

        let err = RelayError::from(TransportError::Timeout("slow".into()));
        assert!(matches!(err, RelayError::Transport(TransportError::Timeout(_))));
    }

    #[test]
    fn invalid_request_display_is_canonical() {
        assert_eq!(RelayError::InvalidRequest.to_string(), INVALID_REQUEST_MESSAGE);
    }
}
