//! 模板处理器

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use reporter_core::{ReporterError, Stored, Template};
use serde_json::Value;

use crate::error::{ApiResult, JsonBody};
use crate::handlers::{find_record, list_records, sanitize_page, to_api, update_record};
use crate::query::TEMPLATE_QUERY;
use crate::state::AppState;
use crate::validation::{id_field, parse_id, Mode, TEMPLATE_SCHEMA};

/// 新建模板
///
/// 请求体中的 `template` 为来源模板或超声报告的 ID，给出时复制来源文档。
pub async fn create_template(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> ApiResult<impl IntoResponse> {
    let fields = TEMPLATE_SCHEMA.validate(&body, Mode::Create)?;
    let name = fields
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let source = id_field(&fields, "template");

    let result = state.workflow.create_template(name, source).await;
    record_generation(&state, &result);
    let template = result?;
    Ok((StatusCode::CREATED, Json(to_api(&template)?)))
}

pub async fn list_templates(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let page = list_records(
        state.repos.templates.as_ref(),
        &TEMPLATE_QUERY,
        &params,
        &state.pagination,
    )
    .await?;
    Ok(Json(sanitize_page(page)?))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let template = find_record::<Template>(state.repos.templates.as_ref(), &id).await?;
    Ok(Json(to_api(&template)?))
}

/// 只允许修改名称，来源与文档 ID 不可变
pub async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<impl IntoResponse> {
    let template =
        update_record::<Template>(state.repos.templates.as_ref(), &TEMPLATE_SCHEMA, &id, &body)
            .await?;
    Ok(Json(to_api(&template)?))
}

/// 从 Google Docs 同步模板名称
pub async fn sync_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let template = state.workflow.sync_template(parse_id(&id)?).await?;
    Ok(Json(to_api(&template)?))
}

pub async fn delete_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.workflow.delete_template(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 记录文档生成指标
pub(crate) fn record_generation<T>(state: &AppState, result: &reporter_core::Result<Stored<T>>) {
    match result {
        Ok(_) => state.monitor.record_document_generated(),
        Err(ReporterError::PartialFailure { .. }) => state.monitor.record_document_orphaned(),
        Err(_) => {}
    }
}
