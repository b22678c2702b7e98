use crate::engine::{OrderRelay, RelayAck};
use crate::types::{RelayError, INVALID_REQUEST_MESSAGE};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::json;
use std::any::Any;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

pub const QUEUE_FAILURE_MESSAGE: &str = "Failed to queue order";
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

// 应用状态
#[derive(Clone, Debug)]
pub struct AppState {
    pub relay: Arc<OrderRelay>,
}

// 失败响应格式
#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl ErrorResponse {
    fn new(error: &str, details: Option<String>) -> Self {
        Self {
            success: false,
            error: error.to_string(),
            details,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            RelayError::InvalidRequest => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(INVALID_REQUEST_MESSAGE, None),
            ),
            RelayError::Transport(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::new(QUEUE_FAILURE_MESSAGE, Some(e.reason_code().to_string())),
            ),
            RelayError::Internal(detail) => {
                // 详情只写日志,不返回给调用方
                error!("订单中继内部错误: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new(INTERNAL_ERROR_MESSAGE, None),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

/// 创建路由
pub fn router(state: AppState, route: &str) -> Router {
    Router::new()
        .route(route, post(relay_order))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::custom(panic_response)),
        )
        .with_state(state)
}

// 接收原始请求体,格式错误统一按 400 处理
async fn relay_order(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<RelayAck>, RelayError> {
    let ack = state.relay.relay(&body).await?;
    Ok(Json(ack))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let descriptor = state.relay.sender().descriptor();
    Json(json!({
        "status": "ok",
        "transport": descriptor.transport,
        "queueName": descriptor.queue_name,
    }))
}

pub(crate) fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    RelayError::Internal(format!("请求处理过程中发生 panic: {}", detail)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransportError;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn transport_error_maps_to_503_with_reason() {
        let response =
            RelayError::Transport(TransportError::QuotaExceeded("full".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], QUEUE_FAILURE_MESSAGE);
        assert_eq!(body["details"], "QuotaExceeded");
    }

    #[tokio::test]
    async fn internal_error_hides_details() {
        let response = RelayError::Internal("secret stack".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"], INTERNAL_ERROR_MESSAGE);
        assert!(body.get("details").is_none());
        assert!(!body.to_string().contains("secret"));
    }

    #[tokio::test]
    async fn panic_maps_to_generic_500() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(
            body,
            json!({"success": false, "error": INTERNAL_ERROR_MESSAGE})
        );
    }
}
