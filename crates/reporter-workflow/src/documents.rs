//! 文档生成流程
//!
//! 模板与报告记录各自对应一个 Google Docs 文档。创建时先产生外部文档，
//! 再保存记录；保存前任一步失败都会把已产生的文档移入回收目录。
//! 删除记录时登记一条移动任务，由发件箱后台任务异步完成移动。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reporter_core::utils::{format_display_date, format_document_date};
use reporter_core::{
    Doctor, Document, Patient, ReporterError, Result, Stored, Template, UsgReport,
};
use reporter_database::{NewDocumentMove, Relocation, Repositories};
use reporter_integration::{DocumentService, Placeholders};
use serde_json::{json, Map};
use tokio::sync::Notify;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::state_machine::{GenerationEvent, GenerationSaga, GenerationStateMachine};

/// Drive 目录配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveFolders {
    pub templates: String,
    pub deleted_templates: String,
    pub reports: String,
    pub deleted_reports: String,
}

/// 新建报告的输入
#[derive(Debug, Clone, PartialEq)]
pub struct NewReport {
    pub patient: Uuid,
    pub referrer: Uuid,
    pub sonologist: Option<Uuid>,
    pub date: DateTime<Utc>,
    pub part_of_scan: String,
    pub findings: Option<String>,
    /// 用于生成报告文档的模板
    pub template: Option<Uuid>,
}

/// 报告文档的占位符取值
pub fn report_placeholders(patient: &Patient, referrer: &Doctor, report: &NewReport) -> Placeholders {
    Placeholders::new()
        .with("name", patient.name.as_str())
        .with("date", format_display_date(&report.date))
        .with("referred_by", referrer.name.as_str())
        .with("part_of_scan", report.part_of_scan.as_str())
        .with(
            "age",
            patient.age.map(|age| age.to_string()).unwrap_or_default(),
        )
        .with("sex", patient.gender.sex_code())
}

/// 报告文档名称：`<患者姓名> - <DD-MM-YYYY>`
pub fn report_document_name(patient: &Patient, date: &DateTime<Utc>) -> String {
    format!("{} - {}", patient.name, format_document_date(date))
}

/// 文档生成流程
pub struct DocumentWorkflow {
    documents: Arc<dyn DocumentService>,
    repos: Repositories,
    folders: DriveFolders,
    outbox_waker: Arc<Notify>,
    machine: GenerationStateMachine,
}

impl DocumentWorkflow {
    pub fn new(
        documents: Arc<dyn DocumentService>,
        repos: Repositories,
        folders: DriveFolders,
        outbox_waker: Arc<Notify>,
    ) -> Self {
        Self {
            documents,
            repos,
            folders,
            outbox_waker,
            machine: GenerationStateMachine::new(),
        }
    }

    pub fn folders(&self) -> &DriveFolders {
        &self.folders
    }

    // ========== 模板 ==========

    /// 新建模板：有来源时复制来源文档，否则新建空白文档
    ///
    /// 来源 ID 先按模板查找，再按超声报告查找。
    pub async fn create_template(
        &self,
        name: String,
        source: Option<Uuid>,
    ) -> Result<Stored<Template>> {
        let source_document = match source {
            Some(id) => Some(self.resolve_template_source(id).await?),
            None => None,
        };

        let mut saga = GenerationSaga::new(&self.machine);
        let document_id = match &source_document {
            Some(source_id) => {
                self.documents
                    .clone_document(source_id, &name, &self.folders.templates)
                    .await?
            }
            None => {
                self.documents
                    .create_blank_document(&name, &self.folders.templates)
                    .await?
            }
        };
        saga.advance(GenerationEvent::CreateDocument)?;

        let template = Template {
            name,
            drive_file_id: document_id.clone(),
        };
        match self.repos.templates.insert(template).await {
            Ok(stored) => {
                saga.advance(GenerationEvent::Persist)?;
                info!(id = %stored.id, document = %document_id, "Template created");
                Ok(stored)
            }
            Err(cause) => {
                self.compensate(
                    saga,
                    &document_id,
                    &self.folders.templates,
                    &self.folders.deleted_templates,
                    cause,
                )
                .await
            }
        }
    }

    async fn resolve_template_source(&self, id: Uuid) -> Result<String> {
        if let Some(template) = self.repos.templates.find_active(id).await? {
            return Ok(template.body.drive_file_id);
        }
        if let Some(report) = self.repos.reports.find_active(id).await? {
            return report.body.drive_file_id.ok_or_else(|| {
                ReporterError::validation("\"template\" refers to a USG report without a document")
            });
        }
        Err(ReporterError::validation(
            "\"template\" must reference an existing template or USG report",
        ))
    }

    /// 用外部文档的当前名称更新模板名称
    pub async fn sync_template(&self, id: Uuid) -> Result<Stored<Template>> {
        let template = self
            .repos
            .templates
            .find_active(id)
            .await?
            .ok_or_else(|| not_found::<Template>())?;

        let name = self
            .documents
            .document_name(&template.body.drive_file_id)
            .await?;
        let mut patch = Map::new();
        patch.insert("name".to_string(), json!(name));

        let updated = self
            .repos
            .templates
            .update_active(id, patch)
            .await?
            .ok_or_else(|| not_found::<Template>())?;
        info!(id = %id, name = %updated.body.name, "Template synced from document");
        Ok(updated)
    }

    /// 软删除模板并登记文档移动
    pub async fn delete_template(&self, id: Uuid) -> Result<()> {
        let relocation = Relocation {
            from_folder: Some(self.folders.templates.clone()),
            to_folder: self.folders.deleted_templates.clone(),
        };
        let deleted = self
            .repos
            .templates
            .soft_delete(id, Some(relocation))
            .await?
            .ok_or_else(|| not_found::<Template>())?;
        self.after_delete(id, deleted.queued_move.is_some());
        Ok(())
    }

    // ========== 报告 ==========

    /// 新建报告
    ///
    /// 所有引用在任何远程调用之前校验；带模板时复制模板文档、替换占位符后保存。
    pub async fn create_report(&self, input: NewReport) -> Result<Stored<UsgReport>> {
        let patient = self
            .repos
            .patients
            .find_active(input.patient)
            .await?
            .ok_or_else(|| missing_reference("patient", "patient"))?;
        let referrer = self
            .repos
            .doctors
            .find_active(input.referrer)
            .await?
            .ok_or_else(|| missing_reference("referrer", "doctor"))?;
        if let Some(sonologist) = input.sonologist {
            self.repos
                .doctors
                .find_active(sonologist)
                .await?
                .ok_or_else(|| missing_reference("sonologist", "doctor"))?;
        }
        let template = match input.template {
            Some(template_id) => Some(
                self.repos
                    .templates
                    .find_active(template_id)
                    .await?
                    .ok_or_else(|| missing_reference("template", "template"))?,
            ),
            None => None,
        };

        let mut report = UsgReport {
            patient: input.patient,
            referrer: input.referrer,
            sonologist: input.sonologist,
            date: input.date,
            part_of_scan: input.part_of_scan.clone(),
            findings: input.findings.clone(),
            drive_file_id: None,
        };

        let mut saga = GenerationSaga::new(&self.machine);
        let Some(template) = template else {
            let stored = self.repos.reports.insert(report).await?;
            saga.advance(GenerationEvent::Persist)?;
            info!(id = %stored.id, "USG report created without document");
            return Ok(stored);
        };

        let name = report_document_name(&patient.body, &input.date);
        let document_id = self
            .documents
            .clone_document(&template.body.drive_file_id, &name, &self.folders.reports)
            .await?;
        saga.advance(GenerationEvent::CreateDocument)?;
        report.drive_file_id = Some(document_id.clone());

        let placeholders = report_placeholders(&patient.body, &referrer.body, &input);
        let outcome = async {
            self.documents
                .replace_placeholders(&document_id, &placeholders)
                .await?;
            saga.advance(GenerationEvent::Substitute)?;
            let stored = self.repos.reports.insert(report).await?;
            saga.advance(GenerationEvent::Persist)?;
            Ok::<_, ReporterError>(stored)
        }
        .await;

        match outcome {
            Ok(stored) => {
                info!(id = %stored.id, document = %document_id, "USG report generated");
                Ok(stored)
            }
            Err(cause) => {
                self.compensate(
                    saga,
                    &document_id,
                    &self.folders.reports,
                    &self.folders.deleted_reports,
                    cause,
                )
                .await
            }
        }
    }

    /// 软删除报告，有文档时登记文档移动
    pub async fn delete_report(&self, id: Uuid) -> Result<()> {
        let relocation = Relocation {
            from_folder: Some(self.folders.reports.clone()),
            to_folder: self.folders.deleted_reports.clone(),
        };
        let deleted = self
            .repos
            .reports
            .soft_delete(id, Some(relocation))
            .await?
            .ok_or_else(|| not_found::<UsgReport>())?;
        self.after_delete(id, deleted.queued_move.is_some());
        Ok(())
    }

    fn after_delete(&self, id: Uuid, queued_move: bool) {
        if queued_move {
            info!(id = %id, "Record deleted, document move queued");
            self.outbox_waker.notify_one();
        } else {
            info!(id = %id, "Record deleted");
        }
    }

    /// 回收已创建的外部文档
    ///
    /// 回收成功时返回原始错误；回收失败时登记重试并返回部分失败。
    async fn compensate<T>(
        &self,
        mut saga: GenerationSaga<'_>,
        document_id: &str,
        active_folder: &str,
        deleted_folder: &str,
        cause: ReporterError,
    ) -> Result<T> {
        saga.advance(GenerationEvent::StepFailed)?;
        warn!(
            document = %document_id,
            "Document generation failed, moving document to deleted folder: {}", cause
        );

        match self
            .documents
            .move_document(document_id, Some(active_folder), deleted_folder)
            .await
        {
            Ok(()) => {
                saga.advance(GenerationEvent::CompensationSucceeded)?;
                info!(document = %document_id, "Generated document moved to deleted folder");
                Err(cause)
            }
            Err(move_error) => {
                saga.advance(GenerationEvent::CompensationFailed)?;
                error!(
                    document = %document_id,
                    "Failed to move orphaned document: {}", move_error
                );

                let retry = NewDocumentMove {
                    document_id: document_id.to_string(),
                    from_folder: Some(active_folder.to_string()),
                    to_folder: deleted_folder.to_string(),
                };
                match self.repos.outbox.enqueue_move(retry).await {
                    Ok(_) => self.outbox_waker.notify_one(),
                    Err(e) => error!(document = %document_id, "Failed to queue document move: {}", e),
                }

                Err(ReporterError::PartialFailure {
                    message: format!(
                        "{}; the generated document {} could not be moved to the deleted folder",
                        cause, document_id
                    ),
                    orphaned_document: Some(document_id.to_string()),
                })
            }
        }
    }
}

fn not_found<T: Document>() -> ReporterError {
    ReporterError::NotFound(format!("{} not found", T::RESOURCE))
}

fn missing_reference(field: &str, resource: &str) -> ReporterError {
    ReporterError::validation(format!(
        "\"{}\" must reference an existing {}",
        field, resource
    ))
}
