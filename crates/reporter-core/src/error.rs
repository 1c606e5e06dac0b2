//! 错误定义模块

use thiserror::Error;

/// 报告系统统一错误类型
#[derive(Error, Debug)]
pub enum ReporterError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("验证错误: {message}")]
    Validation {
        message: String,
        details: Vec<String>,
    },

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("未认证: {0}")]
    Unauthenticated(String),

    /// 没有可用的 Google OAuth 凭据
    #[error("Google login required")]
    GoogleLoginRequired,

    #[error("资源冲突: {0}")]
    Conflict(String),

    #[error("外部服务错误: {0}")]
    External(String),

    /// 多步骤操作中途失败且补偿未成功，外部文档可能成为孤儿
    #[error("部分失败: {message}")]
    PartialFailure {
        message: String,
        orphaned_document: Option<String>,
    },

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl ReporterError {
    /// 单条消息的验证错误
    pub fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Validation {
            details: vec![message.clone()],
            message,
        }
    }

    /// 带多条明细的验证错误
    pub fn validation_details(details: Vec<String>) -> Self {
        Self::Validation {
            message: details.join("; "),
            details,
        }
    }

    /// 错误类别名，用于响应体中的 `kind` 字段
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::NotFound(_) => "NotFoundError",
            Self::Unauthenticated(_) | Self::GoogleLoginRequired => "UnauthenticatedError",
            Self::Conflict(_) => "ConflictError",
            Self::PartialFailure { .. } => "PartialFailureError",
            Self::External(_) => "ExternalServiceError",
            _ => "InternalError",
        }
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for ReporterError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => ReporterError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                ReporterError::Conflict(db_err.message().to_string())
            }
            _ => ReporterError::Database(err.to_string()),
        }
    }
}

/// 报告系统统一结果类型
pub type Result<T> = std::result::Result<T, ReporterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_details_join() {
        let err = ReporterError::validation_details(vec![
            "\"name\" is required".to_string(),
            "\"phone\" is invalid".to_string(),
        ]);
        assert_eq!(err.kind(), "ValidationError");
        assert_eq!(
            err.to_string(),
            "验证错误: \"name\" is required; \"phone\" is invalid"
        );
    }

    #[test]
    fn test_google_login_is_unauthenticated() {
        assert_eq!(ReporterError::GoogleLoginRequired.kind(), "UnauthenticatedError");
        assert_eq!(ReporterError::GoogleLoginRequired.to_string(), "Google login required");
    }
}
