//! 系统监控
//!
//! Prometheus 指标与健康状态汇总。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 系统监控指标收集器
#[derive(Debug, Clone)]
pub struct SystemMonitor {
    /// Prometheus指标注册表
    registry: Registry,
    /// HTTP请求计数器（按方法与状态码）
    http_requests_total: IntCounterVec,
    /// HTTP请求延迟直方图
    http_request_duration: Histogram,
    /// 已生成的外部文档
    documents_generated_total: IntCounter,
    /// 生成失败且补偿也失败的文档
    documents_orphaned_total: IntCounter,
    /// 文档移动任务
    outbox_moves_completed_total: IntCounter,
    outbox_moves_rescheduled_total: IntCounter,
    outbox_moves_failed_total: IntCounter,
    /// 待处理的文档移动任务
    outbox_pending: IntGauge,
    /// 系统启动时间
    system_start_time: Instant,
}

/// 健康等级
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Unhealthy,
}

/// 组件健康状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthLevel,
    pub message: String,
}

impl ComponentHealth {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthLevel::Healthy,
            message: message.into(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthLevel::Unhealthy,
            message: message.into(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: HealthLevel::Degraded,
            message: message.into(),
        }
    }
}

/// 系统健康状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// 总体健康状态
    pub status: HealthLevel,
    /// 各组件状态
    pub components: HashMap<String, ComponentHealth>,
    /// 检查时间戳
    pub timestamp: DateTime<Utc>,
    /// 运行时间（秒）
    pub uptime_secs: u64,
}

impl HealthStatus {
    /// 取各组件中最差的等级作为总体状态
    pub fn from_components(components: HashMap<String, ComponentHealth>, uptime: Duration) -> Self {
        let status = components
            .values()
            .map(|c| c.status)
            .fold(HealthLevel::Healthy, |worst, level| match (worst, level) {
                (HealthLevel::Unhealthy, _) | (_, HealthLevel::Unhealthy) => HealthLevel::Unhealthy,
                (HealthLevel::Degraded, _) | (_, HealthLevel::Degraded) => HealthLevel::Degraded,
                _ => HealthLevel::Healthy,
            });

        Self {
            status,
            components,
            timestamp: Utc::now(),
            uptime_secs: uptime.as_secs(),
        }
    }
}

impl SystemMonitor {
    /// 创建新的系统监控器
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "status"],
        )?;

        let http_request_duration = Histogram::with_opts(HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        ))?;

        let documents_generated_total = IntCounter::with_opts(Opts::new(
            "documents_generated_total",
            "Total number of generated Google documents",
        ))?;

        let documents_orphaned_total = IntCounter::with_opts(Opts::new(
            "documents_orphaned_total",
            "Documents left behind after a failed generation",
        ))?;

        let outbox_moves_completed_total = IntCounter::with_opts(Opts::new(
            "outbox_moves_completed_total",
            "Document moves completed by the background worker",
        ))?;

        let outbox_moves_rescheduled_total = IntCounter::with_opts(Opts::new(
            "outbox_moves_rescheduled_total",
            "Document moves rescheduled after a failure",
        ))?;

        let outbox_moves_failed_total = IntCounter::with_opts(Opts::new(
            "outbox_moves_failed_total",
            "Document moves abandoned after exhausting retries",
        ))?;

        let outbox_pending = IntGauge::with_opts(Opts::new(
            "outbox_pending",
            "Document moves waiting to be processed",
        ))?;

        // 注册所有指标
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(documents_generated_total.clone()))?;
        registry.register(Box::new(documents_orphaned_total.clone()))?;
        registry.register(Box::new(outbox_moves_completed_total.clone()))?;
        registry.register(Box::new(outbox_moves_rescheduled_total.clone()))?;
        registry.register(Box::new(outbox_moves_failed_total.clone()))?;
        registry.register(Box::new(outbox_pending.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration,
            documents_generated_total,
            documents_orphaned_total,
            outbox_moves_completed_total,
            outbox_moves_rescheduled_total,
            outbox_moves_failed_total,
            outbox_pending,
            system_start_time: Instant::now(),
        })
    }

    /// 记录HTTP请求
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration: Duration) {
        debug!("HTTP request: {} {} - {} in {:?}", method, path, status, duration);

        self.http_requests_total
            .with_label_values(&[method, &status.to_string()])
            .inc();
        self.http_request_duration.observe(duration.as_secs_f64());
    }

    pub fn record_document_generated(&self) {
        self.documents_generated_total.inc();
    }

    pub fn record_document_orphaned(&self) {
        self.documents_orphaned_total.inc();
    }

    /// 记录一轮文档移动的结果
    pub fn record_outbox_run(&self, completed: usize, rescheduled: usize, failed: usize) {
        self.outbox_moves_completed_total.inc_by(completed as u64);
        self.outbox_moves_rescheduled_total.inc_by(rescheduled as u64);
        self.outbox_moves_failed_total.inc_by(failed as u64);
    }

    pub fn set_outbox_pending(&self, pending: usize) {
        self.outbox_pending.set(i64::try_from(pending).unwrap_or(i64::MAX));
    }

    /// 获取Prometheus指标
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }

    /// 获取系统运行时间
    pub fn uptime(&self) -> Duration {
        self.system_start_time.elapsed()
    }
}
