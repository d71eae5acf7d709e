//! 可观测性模块
//!
//! 提供 Prometheus 指标、结构化日志和健康检查。

pub mod logging;

use axum::{
    Json, Router,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::storage::{StorageFactory, StorageInstance};

pub use logging::init_tracing;

// ===== Pipeline Metrics =====

/// 流水线指标（原子计数器）
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub http_requests_total: AtomicU64,
    pub http_request_duration_ms_sum: AtomicU64,
    pub events_received: AtomicU64,
    pub events_accepted: AtomicU64,
    pub events_duplicate: AtomicU64,
    pub events_rejected: AtomicU64,
    pub events_late: AtomicU64,
    pub sessions_started: AtomicU64,
    pub sessions_completed: AtomicU64,
    pub sessions_incomplete: AtomicU64,
    pub feature_extractions: AtomicU64,
    pub assessments_total: AtomicU64,
    pub store_retries: AtomicU64,
    pub backpressure_total: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 计数器加一
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 计数器加 n
    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// 记录 HTTP 请求
    pub fn record_http_request(&self, duration_ms: u64) {
        Self::incr(&self.http_requests_total);
        Self::add(&self.http_request_duration_ms_sum, duration_ms);
    }

    /// 生成 Prometheus 格式指标
    pub fn gather(&self) -> String {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let counters: [(&str, &str, u64); 13] = [
            ("http_requests_total", "Total HTTP requests", load(&self.http_requests_total)),
            ("telemetry_events_received_total", "Events received", load(&self.events_received)),
            ("telemetry_events_accepted_total", "Events durably accepted", load(&self.events_accepted)),
            ("telemetry_events_duplicate_total", "Duplicate events discarded", load(&self.events_duplicate)),
            ("telemetry_events_rejected_total", "Events rejected", load(&self.events_rejected)),
            ("telemetry_events_late_total", "Events accepted behind the watermark", load(&self.events_late)),
            ("sessions_started_total", "Sessions started", load(&self.sessions_started)),
            ("sessions_completed_total", "Sessions completed", load(&self.sessions_completed)),
            ("sessions_incomplete_total", "Sessions expired by inactivity", load(&self.sessions_incomplete)),
            ("feature_extractions_total", "Feature vectors stored", load(&self.feature_extractions)),
            ("fused_assessments_total", "Fused assessments produced", load(&self.assessments_total)),
            ("event_store_retries_total", "Event store retries", load(&self.store_retries)),
            ("session_backpressure_total", "Requests refused with backpressure", load(&self.backpressure_total)),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            output.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        }
        output.push_str(&format!(
            "# HELP http_request_duration_seconds HTTP request duration in seconds\n\
             # TYPE http_request_duration_seconds summary\n\
             http_request_duration_seconds_sum {}\n\
             http_request_duration_seconds_count {}\n",
            load(&self.http_request_duration_ms_sum) as f64 / 1000.0,
            load(&self.http_requests_total),
        ));
        output
    }
}

// ===== Health Check =====

/// 健康检查状态
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub uptime_seconds: f64,
    pub checks: Vec<HealthCheck>,
}

/// 单个健康检查项
#[derive(Debug, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: String,
    pub message: Option<String>,
    pub latency_ms: Option<u64>,
}

/// 应用状态（用于健康检查）
#[derive(Clone)]
pub struct ObservabilityState {
    pub metrics: Arc<PipelineMetrics>,
    pub storage: StorageInstance,
    pub start_time: DateTime<Utc>,
    pub version: String,
}

impl ObservabilityState {
    pub fn new(version: String, metrics: Arc<PipelineMetrics>, storage: StorageInstance) -> Self {
        Self {
            metrics,
            storage,
            start_time: Utc::now(),
            version,
        }
    }

    /// 获取应用正常运行时间
    pub fn uptime_seconds(&self) -> f64 {
        (Utc::now() - self.start_time).num_seconds() as f64
    }

    async fn check_event_store(&self) -> HealthCheck {
        let start = std::time::Instant::now();
        let result = StorageFactory::health_check(&self.storage).await;
        let latency_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(_) => HealthCheck {
                name: "event_store".to_string(),
                status: "healthy".to_string(),
                message: None,
                latency_ms: Some(latency_ms),
            },
            Err(e) => HealthCheck {
                name: "event_store".to_string(),
                status: "unhealthy".to_string(),
                message: Some(e.to_string()),
                latency_ms: Some(latency_ms),
            },
        }
    }
}

// ===== Health Check Handlers =====

/// 获取完整健康状态
pub async fn health_check(State(state): State<Arc<ObservabilityState>>) -> impl IntoResponse {
    let checks = vec![state.check_event_store().await];
    let all_healthy = checks.iter().all(|c| c.status == "healthy");

    let health_status = HealthStatus {
        status: if all_healthy {
            "healthy".to_string()
        } else {
            "unhealthy".to_string()
        },
        timestamp: Utc::now().to_rfc3339(),
        version: state.version.clone(),
        uptime_seconds: state.uptime_seconds(),
        checks,
    };

    let status_code = if all_healthy {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health_status))
}

/// 简单存活检查
pub async fn liveness() -> impl IntoResponse {
    "OK"
}

/// 就绪检查（检查事件存储）
pub async fn readiness(State(state): State<Arc<ObservabilityState>>) -> impl IntoResponse {
    if state.check_event_store().await.status == "healthy" {
        (axum::http::StatusCode::OK, "Ready")
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "Not Ready")
    }
}

/// Prometheus 指标端点
pub async fn metrics(State(state): State<Arc<ObservabilityState>>) -> impl IntoResponse {
    (axum::http::StatusCode::OK, state.metrics.gather())
}

/// 版本信息端点
pub async fn version(State(state): State<Arc<ObservabilityState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "version": state.version,
        "uptime_seconds": state.uptime_seconds(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// 创建可观测性路由
pub fn create_observability_router(state: Arc<ObservabilityState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(metrics))
        .route("/version", get(version))
        .with_state(state)
}

// ===== Request Metrics Middleware =====

/// 记录请求指标的中间件
pub async fn metrics_middleware(
    State(metrics): State<Arc<PipelineMetrics>>,
    req: Request,
    next: Next,
) -> Response {
    let start = std::time::Instant::now();
    let response = next.run(req).await;
    metrics.record_http_request(start.elapsed().as_millis() as u64);
    response
}
