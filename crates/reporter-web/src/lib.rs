//! # Reporter Web 模块
//!
//! 超声报告系统的 HTTP 接口：
//! - JWT 登录与认证中间件
//! - 医生、患者、模板、超声报告的增删改查
//! - 查询参数与请求体校验、统一错误响应
//! - 健康检查与 Prometheus 指标

pub mod auth;
pub mod error;
pub mod handlers;
pub mod query;
pub mod reports;
pub mod server;
pub mod state;
pub mod templates;
pub mod validation;

pub use auth::AuthService;
pub use error::{ApiError, ApiResult};
pub use server::{create_app, ServerOptions, WebServer};
pub use state::AppState;
