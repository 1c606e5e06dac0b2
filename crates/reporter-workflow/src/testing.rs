//! 测试用的文档服务替身，记录每次调用并可按操作注入失败

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use reporter_core::{ReporterError, Result};
use reporter_integration::{DocumentService, Placeholders};

/// 文档操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentOperation {
    CreateBlank,
    Clone,
    Move,
    Replace,
    Name,
}

/// 一次调用记录
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentCall {
    CreateBlank {
        name: String,
        folder: String,
    },
    Clone {
        source: String,
        name: String,
        folder: String,
    },
    Move {
        document: String,
        from: Option<String>,
        to: String,
    },
    Replace {
        document: String,
        values: Placeholders,
    },
    Name {
        document: String,
    },
}

#[derive(Debug, Default)]
pub struct RecordingDocumentService {
    calls: Mutex<Vec<DocumentCall>>,
    failing: Mutex<HashSet<DocumentOperation>>,
    names: Mutex<HashMap<String, String>>,
    next_id: AtomicUsize,
}

impl RecordingDocumentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让某类操作此后都失败
    pub fn fail(&self, operation: DocumentOperation) {
        self.lock_failing().insert(operation);
    }

    pub fn recover(&self, operation: DocumentOperation) {
        self.lock_failing().remove(&operation);
    }

    /// 修改外部文档的名称，模拟在 Google Docs 中改名
    pub fn rename(&self, document: &str, name: &str) {
        self.lock_names()
            .insert(document.to_string(), name.to_string());
    }

    pub fn calls(&self) -> Vec<DocumentCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn moves(&self) -> Vec<DocumentCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, DocumentCall::Move { .. }))
            .collect()
    }

    fn lock_failing(&self) -> std::sync::MutexGuard<'_, HashSet<DocumentOperation>> {
        self.failing.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_names(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.names.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, operation: DocumentOperation, call: DocumentCall) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        if self.lock_failing().contains(&operation) {
            return Err(ReporterError::External(format!(
                "Simulated {:?} failure",
                operation
            )));
        }
        Ok(())
    }

    fn new_document(&self, name: &str) -> String {
        let id = format!("doc-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.lock_names().insert(id.clone(), name.to_string());
        id
    }
}

#[async_trait]
impl DocumentService for RecordingDocumentService {
    async fn create_blank_document(&self, name: &str, folder_id: &str) -> Result<String> {
        self.record(
            DocumentOperation::CreateBlank,
            DocumentCall::CreateBlank {
                name: name.to_string(),
                folder: folder_id.to_string(),
            },
        )?;
        Ok(self.new_document(name))
    }

    async fn clone_document(
        &self,
        source_id: &str,
        name: &str,
        folder_id: &str,
    ) -> Result<String> {
        self.record(
            DocumentOperation::Clone,
            DocumentCall::Clone {
                source: source_id.to_string(),
                name: name.to_string(),
                folder: folder_id.to_string(),
            },
        )?;
        Ok(self.new_document(name))
    }

    async fn move_document(
        &self,
        document_id: &str,
        from_folder: Option<&str>,
        to_folder: &str,
    ) -> Result<()> {
        self.record(
            DocumentOperation::Move,
            DocumentCall::Move {
                document: document_id.to_string(),
                from: from_folder.map(str::to_string),
                to: to_folder.to_string(),
            },
        )
    }

    async fn replace_placeholders(&self, document_id: &str, values: &Placeholders) -> Result<()> {
        self.record(
            DocumentOperation::Replace,
            DocumentCall::Replace {
                document: document_id.to_string(),
                values: values.clone(),
            },
        )
    }

    async fn document_name(&self, document_id: &str) -> Result<String> {
        self.record(
            DocumentOperation::Name,
            DocumentCall::Name {
                document: document_id.to_string(),
            },
        )?;
        self.lock_names()
            .get(document_id)
            .cloned()
            .ok_or_else(|| ReporterError::External(format!("Unknown document {}", document_id)))
    }
}
