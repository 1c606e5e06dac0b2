//! 数据库模型

use chrono::{DateTime, Utc};
use reporter_core::{Document, ReporterError, Result, Stored, User};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

// 数据库表模型 - 使用FromRow trait用于SQL查询

/// 文档集合表的一行
#[derive(Debug, Clone, FromRow)]
pub struct DbDocument {
    pub id: Uuid,
    pub body: Value,
    pub deleted: bool,
    pub revision: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbDocument {
    /// 将实体与元数据组装为一行
    pub fn from_stored<T: Document>(stored: &Stored<T>) -> Result<Self> {
        Ok(Self {
            id: stored.id,
            body: serde_json::to_value(&stored.body)?,
            deleted: stored.deleted,
            revision: stored.revision,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        })
    }

    /// 解码 JSON 主体，还原为带元数据的实体
    pub fn into_stored<T: Document>(self) -> Result<Stored<T>> {
        let body = serde_json::from_value(self.body).map_err(|e| {
            ReporterError::Database(format!(
                "Corrupt {} record {}: {}",
                T::RESOURCE,
                self.id,
                e
            ))
        })?;
        Ok(Stored {
            id: self.id,
            revision: self.revision,
            deleted: self.deleted,
            created_at: self.created_at,
            updated_at: self.updated_at,
            body,
        })
    }
}

/// 数据库用户表
#[derive(Debug, FromRow)]
pub struct DbUser {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub password: String,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl From<DbUser> for User {
    fn from(db_user: DbUser) -> Self {
        User {
            id: db_user.id,
            first_name: db_user.first_name,
            last_name: db_user.last_name,
            username: db_user.username,
            password: db_user.password,
            created_at: db_user.created_at,
        }
    }
}

/// 文档移动任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MoveStatus {
    Pending,
    Completed,
    Failed,
}

impl MoveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoveStatus::Pending => "PENDING",
            MoveStatus::Completed => "COMPLETED",
            MoveStatus::Failed => "FAILED",
        }
    }
}

/// 软删除后把外部文档移入回收目录的请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub from_folder: Option<String>,
    pub to_folder: String,
}

/// 新的文档移动任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocumentMove {
    pub document_id: String,
    pub from_folder: Option<String>,
    pub to_folder: String,
}

impl NewDocumentMove {
    pub fn new(document_id: impl Into<String>, relocation: &Relocation) -> Self {
        Self {
            document_id: document_id.into(),
            from_folder: relocation.from_folder.clone(),
            to_folder: relocation.to_folder.clone(),
        }
    }
}

/// 待执行（或已执行）的文档移动任务，即发件箱条目
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMove {
    pub id: Uuid,
    pub document_id: String,
    pub from_folder: Option<String>,
    pub to_folder: String,
    pub status: MoveStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentMove {
    pub fn pending(new_move: NewDocumentMove) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            document_id: new_move.document_id,
            from_folder: new_move.from_folder,
            to_folder: new_move.to_folder,
            status: MoveStatus::Pending,
            attempts: 0,
            last_error: None,
            next_attempt_at: now,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 数据库文档移动表
#[derive(Debug, FromRow)]
pub struct DbDocumentMove {
    pub id: Uuid,
    pub document_id: String,
    pub from_folder: Option<String>,
    pub to_folder: String,
    pub status: String, // 存储为字符串，转换为MoveStatus枚举
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbDocumentMove> for DocumentMove {
    fn from(db_move: DbDocumentMove) -> Self {
        DocumentMove {
            id: db_move.id,
            document_id: db_move.document_id,
            from_folder: db_move.from_folder,
            to_folder: db_move.to_folder,
            status: match db_move.status.as_str() {
                "COMPLETED" => MoveStatus::Completed,
                "FAILED" => MoveStatus::Failed,
                _ => MoveStatus::Pending,
            },
            attempts: db_move.attempts,
            last_error: db_move.last_error,
            next_attempt_at: db_move.next_attempt_at,
            created_at: db_move.created_at,
            updated_at: db_move.updated_at,
        }
    }
}

/// 软删除结果：被删除的记录，以及随之登记的移动任务
#[derive(Debug, Clone)]
pub struct SoftDeleted<T> {
    pub record: Stored<T>,
    pub queued_move: Option<DocumentMove>,
}

/// 合并部分更新：顶层字段覆盖，`null` 表示移除该字段
pub fn merge_patch(body: &mut Value, patch: &serde_json::Map<String, Value>) {
    if let Value::Object(target) = body {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// 合并并校验更新后的主体仍是合法实体
pub fn apply_patch<T: Document>(
    body: &Value,
    patch: &serde_json::Map<String, Value>,
) -> Result<(Value, T)> {
    let mut merged = body.clone();
    merge_patch(&mut merged, patch);
    let entity: T = serde_json::from_value(merged.clone())
        .map_err(|e| ReporterError::validation(format!("Invalid {} update: {}", T::RESOURCE, e)))?;
    // 以实体的规范序列化结果为准
    let normalized = serde_json::to_value(&entity)?;
    Ok((normalized, entity))
}
