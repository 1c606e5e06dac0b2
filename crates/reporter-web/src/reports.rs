//! 超声报告处理器
//!
//! 返回的报告中 `patient`、`referrer`、`sonologist` 会展开为对应记录。

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use reporter_core::{sanitize, Document, ReporterError, Stored, UsgReport};
use reporter_database::Repositories;
use reporter_workflow::NewReport;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ApiResult, JsonBody};
use crate::handlers::{find_record, list_records, update_record};
use crate::query::USG_REPORT_QUERY;
use crate::state::AppState;
use crate::validation::{id_field, parse_id, Mode, USG_REPORT_SCHEMA};

/// 展开报告引用的患者与医生；引用的记录不存在时为 null
pub(crate) async fn populate(repos: &Repositories, report: &Stored<UsgReport>) -> ApiResult<Value> {
    let mut populated = populate_page(repos, std::slice::from_ref(report)).await?;
    Ok(populated.pop().unwrap_or(Value::Null))
}

/// 批量展开一页报告：患者与医生各查询一次
pub(crate) async fn populate_page(
    repos: &Repositories,
    reports: &[Stored<UsgReport>],
) -> ApiResult<Vec<Value>> {
    let mut patient_ids: Vec<Uuid> = reports.iter().map(|r| r.body.patient).collect();
    let mut doctor_ids: Vec<Uuid> = reports
        .iter()
        .flat_map(|r| std::iter::once(r.body.referrer).chain(r.body.sonologist))
        .collect();
    patient_ids.sort_unstable();
    patient_ids.dedup();
    doctor_ids.sort_unstable();
    doctor_ids.dedup();

    let (patients, doctors) = tokio::try_join!(
        repos.patients.find_by_ids(&patient_ids),
        repos.doctors.find_by_ids(&doctor_ids),
    )?;
    let patients = by_id(patients)?;
    let doctors = by_id(doctors)?;

    let mut populated = Vec::with_capacity(reports.len());
    for report in reports {
        let mut value = serde_json::to_value(report).map_err(ReporterError::from)?;
        value["patient"] = lookup(&patients, report.body.patient);
        value["referrer"] = lookup(&doctors, report.body.referrer);
        if let Some(sonologist) = report.body.sonologist {
            value["sonologist"] = lookup(&doctors, sonologist);
        }
        populated.push(sanitize(value));
    }
    Ok(populated)
}

fn by_id<T: Document>(records: Vec<Stored<T>>) -> ApiResult<HashMap<Uuid, Value>> {
    let mut values = HashMap::with_capacity(records.len());
    for record in records {
        let id = record.id;
        values.insert(id, serde_json::to_value(record).map_err(ReporterError::from)?);
    }
    Ok(values)
}

fn lookup(values: &HashMap<Uuid, Value>, id: Uuid) -> Value {
    values.get(&id).cloned().unwrap_or(Value::Null)
}

fn new_report(fields: &Map<String, Value>) -> ApiResult<NewReport> {
    let required_id = |name: &str| {
        id_field(fields, name)
            .ok_or_else(|| ReporterError::validation(format!("\"{}\" is required", name)))
    };
    let text = |name: &str| fields.get(name).and_then(Value::as_str).map(str::to_string);
    let date = fields
        .get("date")
        .cloned()
        .map(serde_json::from_value::<DateTime<Utc>>)
        .transpose()
        .map_err(|_| ReporterError::validation("\"date\" must be a valid date"))?
        .ok_or_else(|| ReporterError::validation("\"date\" is required"))?;

    Ok(NewReport {
        patient: required_id("patient")?,
        referrer: required_id("referrer")?,
        sonologist: id_field(fields, "sonologist"),
        date,
        part_of_scan: text("partOfScan").unwrap_or_default(),
        findings: text("findings"),
        template: id_field(fields, "template"),
    })
}

/// 新建报告，带 `template` 时生成 Google Docs 报告文档
pub async fn create_report(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> ApiResult<impl IntoResponse> {
    let fields = USG_REPORT_SCHEMA.validate(&body, Mode::Create)?;
    let input = new_report(&fields)?;

    let result = state.workflow.create_report(input).await;
    match &result {
        Ok(report) if report.body.drive_file_id.is_some() => {
            state.monitor.record_document_generated()
        }
        Err(ReporterError::PartialFailure { .. }) => state.monitor.record_document_orphaned(),
        _ => {}
    }
    let report = result?;
    Ok((StatusCode::CREATED, Json(populate(&state.repos, &report).await?)))
}

pub async fn list_reports(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let page = list_records(
        state.repos.reports.as_ref(),
        &USG_REPORT_QUERY,
        &params,
        &state.pagination,
    )
    .await?;

    let data = populate_page(&state.repos, &page.data).await?;
    Ok(Json(reporter_database::Page {
        data,
        has_more: page.has_more,
        page: page.page,
        limit: page.limit,
        total_pages: page.total_pages,
        total: page.total,
    }))
}

pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let report = find_record::<UsgReport>(state.repos.reports.as_ref(), &id).await?;
    Ok(Json(populate(&state.repos, &report).await?))
}

/// 更新报告；修改引用时同样要求引用的记录存在
pub async fn update_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<impl IntoResponse> {
    let fields = USG_REPORT_SCHEMA.validate(&body, Mode::Update)?;
    if let Some(patient) = id_field(&fields, "patient") {
        if state.repos.patients.find_active(patient).await?.is_none() {
            return Err(
                ReporterError::validation("\"patient\" must reference an existing patient").into(),
            );
        }
    }
    for name in ["referrer", "sonologist"] {
        if let Some(doctor) = id_field(&fields, name) {
            if state.repos.doctors.find_active(doctor).await?.is_none() {
                return Err(ReporterError::validation(format!(
                    "\"{}\" must reference an existing doctor",
                    name
                ))
                .into());
            }
        }
    }

    let report =
        update_record::<UsgReport>(state.repos.reports.as_ref(), &USG_REPORT_SCHEMA, &id, &body)
            .await?;
    Ok(Json(populate(&state.repos, &report).await?))
}

pub async fn delete_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.workflow.delete_report(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}
