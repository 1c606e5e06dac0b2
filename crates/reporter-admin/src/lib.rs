//! 报告系统管理模块
//!
//! 配置加载与校验、日志初始化、Prometheus 指标。

pub mod config;
pub mod logging;
pub mod monitoring;

pub use config::{
    AuthConfig, ConfigValidator, DatabaseConfig, GoogleConfig, LoggingConfig, OutboxConfig,
    PaginationConfig, ReporterConfig, ServerConfig, DEFAULT_CONFIG_PATH,
};
pub use logging::{init_logging, LogFormat};
pub use monitoring::{ComponentHealth, HealthLevel, HealthStatus, SystemMonitor};
