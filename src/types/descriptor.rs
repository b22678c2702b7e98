use serde::{Deserialize, Serialize};

/// 传输层描述信息,用于健康检查和启动日志
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportDescriptor {
    pub transport: String,
    pub queue_name: String,
}
