//! HTTP 错误映射
//!
//! 所有处理器的错误都在这里统一转换为状态码和 JSON 响应体。

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use reporter_core::ReporterError;
use serde_json::{json, Value};
use tracing::{error, warn};

/// 处理器返回的错误
#[derive(Debug)]
pub struct ApiError(pub ReporterError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<ReporterError> for ApiError {
    fn from(err: ReporterError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ReporterError::Validation { .. } => StatusCode::BAD_REQUEST,
            ReporterError::NotFound(_) => StatusCode::NOT_FOUND,
            ReporterError::Unauthenticated(_) | ReporterError::GoogleLoginRequired => {
                StatusCode::UNAUTHORIZED
            }
            ReporterError::Conflict(_) => StatusCode::CONFLICT,
            ReporterError::External(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 面向调用方的消息，内部错误不暴露细节
    fn public_message(&self) -> String {
        match &self.0 {
            ReporterError::Validation { message, .. } => message.clone(),
            ReporterError::NotFound(message)
            | ReporterError::Unauthenticated(message)
            | ReporterError::Conflict(message) => message.clone(),
            ReporterError::GoogleLoginRequired => "Google login required".to_string(),
            ReporterError::External(message) => format!("Document service error: {}", message),
            ReporterError::PartialFailure { message, .. } => message.clone(),
            _ => "Something went wrong, please try again later".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.0.kind(), "Request failed: {}", self.0);
        } else {
            warn!(kind = self.0.kind(), status = status.as_u16(), "Request rejected: {}", self.0);
        }

        let mut body = json!({
            "error": true,
            "kind": self.0.kind(),
            "message": self.public_message(),
            "status": status.as_u16(),
        });
        match &self.0 {
            ReporterError::Validation { details, .. } => {
                body["details"] = json!(details);
            }
            ReporterError::PartialFailure {
                orphaned_document, ..
            } => {
                body["orphanedDocument"] = json!(orphaned_document);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

/// 请求体 JSON，解析失败统一返回 400
#[derive(Debug)]
pub struct JsonBody(pub Value);

#[async_trait]
impl<S> FromRequest<S> for JsonBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<Value>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(body_rejection(rejection)),
        }
    }
}

fn body_rejection(rejection: JsonRejection) -> ApiError {
    ApiError(ReporterError::validation(rejection.body_text()))
}
