//! HTTP处理器
//!
//! 通用的增删改查流程：校验 → 存储 → 清洗 → 序列化。
//! 医生与患者直接使用通用流程，模板与报告见 [`crate::templates`] 和 [`crate::reports`]。

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use reporter_admin::{ComponentHealth, HealthLevel, HealthStatus, PaginationConfig};
use reporter_core::{sanitize, Doctor, Document, Patient, ReporterError, Stored};
use reporter_database::{paginate, DocumentStore, MoveStatus, Page};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiResult, JsonBody};
use crate::query::{QuerySchema, DOCTOR_QUERY, PATIENT_QUERY};
use crate::state::AppState;
use crate::validation::{parse_id, BodySchema, Mode, DOCTOR_SCHEMA, PATIENT_SCHEMA};

/// 序列化并清洗单条记录
pub(crate) fn to_api<T: Serialize>(record: &T) -> ApiResult<Value> {
    let value = serde_json::to_value(record).map_err(ReporterError::from)?;
    Ok(sanitize(value))
}

pub(crate) fn not_found<T: Document>() -> ReporterError {
    ReporterError::NotFound(format!("{} not found", T::RESOURCE))
}

/// 清洗分页结果中的每条记录
pub(crate) fn sanitize_page<T: Serialize>(page: Page<T>) -> ApiResult<Page<Value>> {
    let data = page.data.iter().map(to_api).collect::<ApiResult<Vec<_>>>()?;
    Ok(Page {
        data,
        has_more: page.has_more,
        page: page.page,
        limit: page.limit,
        total_pages: page.total_pages,
        total: page.total,
    })
}

/// 校验请求体中的全部字段后转换为实体
pub(crate) fn into_body<T: Document>(fields: serde_json::Map<String, Value>) -> ApiResult<T> {
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| ReporterError::validation(e.to_string()).into())
}

pub(crate) async fn create_record<T: Document>(
    store: &dyn DocumentStore<T>,
    schema: &BodySchema,
    body: &Value,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let fields = schema.validate(body, Mode::Create)?;
    let stored = store.insert(into_body::<T>(fields)?).await?;
    info!(collection = T::COLLECTION, id = %stored.id, "Record created");
    Ok((StatusCode::CREATED, Json(to_api(&stored)?)))
}

pub(crate) async fn list_records<T: Document>(
    store: &dyn DocumentStore<T>,
    schema: &QuerySchema,
    params: &HashMap<String, String>,
    pagination: &PaginationConfig,
) -> ApiResult<Page<Stored<T>>> {
    let query = schema.parse(params, pagination)?;
    Ok(paginate(store, &query.filter, query.page).await?)
}

pub(crate) async fn find_record<T: Document>(
    store: &dyn DocumentStore<T>,
    raw_id: &str,
) -> ApiResult<Stored<T>> {
    let id = parse_id(raw_id)?;
    Ok(store.find_active(id).await?.ok_or_else(not_found::<T>)?)
}

pub(crate) async fn update_record<T: Document>(
    store: &dyn DocumentStore<T>,
    schema: &BodySchema,
    raw_id: &str,
    body: &Value,
) -> ApiResult<Stored<T>> {
    let id = parse_id(raw_id)?;
    let patch = schema.validate(body, Mode::Update)?;
    let updated = store
        .update_active(id, patch)
        .await?
        .ok_or_else(not_found::<T>)?;
    info!(collection = T::COLLECTION, id = %id, revision = updated.revision, "Record updated");
    Ok(updated)
}

pub(crate) async fn delete_record<T: Document>(
    store: &dyn DocumentStore<T>,
    raw_id: &str,
) -> ApiResult<StatusCode> {
    let id: Uuid = parse_id(raw_id)?;
    store.soft_delete(id, None).await?.ok_or_else(not_found::<T>)?;
    info!(collection = T::COLLECTION, id = %id, "Record deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ========== 医生 ==========

pub async fn create_doctor(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> ApiResult<impl IntoResponse> {
    create_record(state.repos.doctors.as_ref(), &DOCTOR_SCHEMA, &body).await
}

pub async fn list_doctors(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let page = list_records(
        state.repos.doctors.as_ref(),
        &DOCTOR_QUERY,
        &params,
        &state.pagination,
    )
    .await?;
    Ok(Json(sanitize_page(page)?))
}

pub async fn get_doctor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let doctor = find_record::<Doctor>(state.repos.doctors.as_ref(), &id).await?;
    Ok(Json(to_api(&doctor)?))
}

pub async fn update_doctor(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<impl IntoResponse> {
    let doctor = update_record::<Doctor>(state.repos.doctors.as_ref(), &DOCTOR_SCHEMA, &id, &body)
        .await?;
    Ok(Json(to_api(&doctor)?))
}

pub async fn delete_doctor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    delete_record::<Doctor>(state.repos.doctors.as_ref(), &id).await
}

// ========== 患者 ==========

pub async fn create_patient(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> ApiResult<impl IntoResponse> {
    create_record(state.repos.patients.as_ref(), &PATIENT_SCHEMA, &body).await
}

pub async fn list_patients(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let page = list_records(
        state.repos.patients.as_ref(),
        &PATIENT_QUERY,
        &params,
        &state.pagination,
    )
    .await?;
    Ok(Json(sanitize_page(page)?))
}

pub async fn get_patient(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let patient = find_record::<Patient>(state.repos.patients.as_ref(), &id).await?;
    Ok(Json(to_api(&patient)?))
}

pub async fn update_patient(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<impl IntoResponse> {
    let patient =
        update_record::<Patient>(state.repos.patients.as_ref(), &PATIENT_SCHEMA, &id, &body)
            .await?;
    Ok(Json(to_api(&patient)?))
}

pub async fn delete_patient(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    delete_record::<Patient>(state.repos.patients.as_ref(), &id).await
}

// ========== 运维 ==========

/// 健康检查处理器
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();

    match state.repos.credentials.current().await {
        Ok(credential) => {
            components.insert("storage".to_string(), ComponentHealth::healthy("reachable"));
            let google = if credential.is_some() {
                ComponentHealth::healthy("credentials stored")
            } else {
                ComponentHealth::degraded("Google login required")
            };
            components.insert("google".to_string(), google);
        }
        Err(e) => {
            components.insert("storage".to_string(), ComponentHealth::unhealthy(e.to_string()));
        }
    }

    let outbox = match (
        state.repos.outbox.list_moves(Some(MoveStatus::Pending)).await,
        state.repos.outbox.list_moves(Some(MoveStatus::Failed)).await,
    ) {
        (Ok(pending), Ok(failed)) => {
            state.monitor.set_outbox_pending(pending.len());
            if failed.is_empty() {
                ComponentHealth::healthy(format!("{} pending", pending.len()))
            } else {
                ComponentHealth::degraded(format!("{} document moves failed", failed.len()))
            }
        }
        (Err(e), _) | (_, Err(e)) => ComponentHealth::unhealthy(e.to_string()),
    };
    components.insert("outbox".to_string(), outbox);

    let health = HealthStatus::from_components(components, state.monitor.uptime());
    let status = if health.status == HealthLevel::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(health))
}

/// Prometheus 指标
pub async fn metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let body = state
        .monitor
        .render()
        .map_err(|e| ReporterError::Internal(format!("Failed to render metrics: {}", e)))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
